//! Non-dominated front extraction for two-objective campaigns.

use vol_core::errors::ErrorInfo;
use vol_core::{ExperimentRecord, ObjectiveSpec, VolError};

/// Whether `a` dominates `b` in maximize-oriented space.
///
/// `a` dominates `b` when it is at least as good on every axis and strictly
/// better on one. Reusable for the pairwise check a three-or-more objective
/// front would need.
pub fn dominates(a: &[f64], b: &[f64]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let mut strictly_better = false;
    for (lhs, rhs) in a.iter().zip(b.iter()) {
        if lhs < rhs {
            return false;
        }
        if lhs > rhs {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Extracts the two-objective Pareto front from accumulated records.
///
/// Both objectives are direction-normalized to maximize-orientation for the
/// dominance test only; the returned records keep their stored values. The
/// sweep sorts by normalized `obj_x` descending and admits a record iff its
/// normalized `obj_y` strictly exceeds the running maximum, so equal-`obj_y`
/// duplicates never join the front. Output order follows the sweep
/// (descending `obj_x`).
pub fn front(
    records: &[ExperimentRecord],
    obj_x: ObjectiveSpec,
    obj_y: ObjectiveSpec,
) -> Result<Vec<ExperimentRecord>, VolError> {
    let mut normalized = Vec::with_capacity(records.len());
    for record in records {
        let x = normalized_value(record, obj_x)?;
        let y = normalized_value(record, obj_y)?;
        normalized.push((x, y, record));
    }
    // Descending x; exact x ties keep iteration order so reruns are stable.
    normalized.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.2.iteration.cmp(&b.2.iteration))
    });

    let mut best_y = f64::NEG_INFINITY;
    let mut members = Vec::new();
    for (_, y, record) in normalized {
        if y > best_y {
            best_y = y;
            members.push(record.clone());
        }
    }
    Ok(members)
}

fn normalized_value(record: &ExperimentRecord, spec: ObjectiveSpec) -> Result<f64, VolError> {
    let name = spec.kind.as_str();
    let raw = record.raw.get(name).copied().ok_or_else(|| {
        VolError::Campaign(
            ErrorInfo::new("front-missing-objective", "record lacks the requested objective")
                .with_context("objective", name.to_string())
                .with_context("iteration", record.iteration.to_string()),
        )
    })?;
    Ok(spec.direction.sign() * raw)
}
