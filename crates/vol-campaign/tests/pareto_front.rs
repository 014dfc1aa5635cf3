use std::collections::BTreeMap;

use proptest::prelude::*;
use vol_campaign::pareto::{dominates, front};
use vol_core::{Direction, ExperimentRecord, ObjectiveKind, ObjectiveSpec};

const X: &str = "yield";
const Y: &str = "normalized-area";

fn record(iteration: usize, x: f64, y: f64) -> ExperimentRecord {
    let raw = BTreeMap::from([(X.to_string(), x), (Y.to_string(), y)]);
    ExperimentRecord {
        iteration,
        timestamp: "2026-01-01 00:00:00".to_string(),
        parameters: BTreeMap::new(),
        raw: raw.clone(),
        signed: raw,
        converged: true,
    }
}

fn max_specs() -> (ObjectiveSpec, ObjectiveSpec) {
    (
        ObjectiveSpec::new(ObjectiveKind::Yield, Direction::Maximize),
        ObjectiveSpec::new(ObjectiveKind::NormalizedArea, Direction::Maximize),
    )
}

fn points(members: &[ExperimentRecord]) -> Vec<(f64, f64)> {
    members
        .iter()
        .map(|member| (member.raw[X], member.raw[Y]))
        .collect()
}

#[test]
fn sweep_admits_only_strict_improvements() {
    // (3, 2) is dominated by (4, 3); everything else trades off.
    let records = vec![
        record(1, 5.0, 1.0),
        record(2, 4.0, 3.0),
        record(3, 3.0, 2.0),
        record(4, 2.0, 5.0),
    ];
    let (x, y) = max_specs();
    let members = front(&records, x, y).unwrap();
    assert_eq!(points(&members), vec![(5.0, 1.0), (4.0, 3.0), (2.0, 5.0)]);
}

#[test]
fn equal_y_duplicates_never_join_the_front() {
    let records = vec![record(1, 5.0, 2.0), record(2, 4.0, 2.0), record(3, 3.0, 2.0)];
    let (x, y) = max_specs();
    let members = front(&records, x, y).unwrap();
    assert_eq!(points(&members), vec![(5.0, 2.0)]);
}

#[test]
fn front_of_a_front_is_the_front() {
    let records = vec![
        record(1, 5.0, 1.0),
        record(2, 4.0, 3.0),
        record(3, 3.0, 2.0),
        record(4, 2.0, 5.0),
        record(5, 1.0, 4.0),
    ];
    let (x, y) = max_specs();
    let once = front(&records, x, y).unwrap();
    let twice = front(&once, x, y).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn minimize_direction_flips_the_dominance_axis() {
    // With y minimized, small raw y is good: (5, 1) dominates every record
    // it beats on x, and (2, 5) is now the worst corner.
    let records = vec![
        record(1, 5.0, 1.0),
        record(2, 4.0, 3.0),
        record(3, 2.0, 5.0),
    ];
    let x = ObjectiveSpec::new(ObjectiveKind::Yield, Direction::Maximize);
    let y = ObjectiveSpec::new(ObjectiveKind::NormalizedArea, Direction::Minimize);
    let members = front(&records, x, y).unwrap();
    assert_eq!(points(&members), vec![(5.0, 1.0)]);
}

#[test]
fn direction_inversion_round_trips_the_front() {
    // Negating every stored value and flipping both registered directions
    // leaves the normalized space unchanged, so the same records make the
    // front in the same sweep order.
    let records = vec![
        record(1, 5.0, 1.0),
        record(2, 4.0, 3.0),
        record(3, 3.0, 2.0),
        record(4, 2.0, 5.0),
        record(5, 1.0, 4.0),
    ];
    let (x, y) = max_specs();
    let baseline: Vec<usize> = front(&records, x, y)
        .unwrap()
        .iter()
        .map(|member| member.iteration)
        .collect();

    let inverted: Vec<ExperimentRecord> = records
        .iter()
        .cloned()
        .map(|mut record| {
            for value in record.raw.values_mut() {
                *value = -*value;
            }
            for value in record.signed.values_mut() {
                *value = -*value;
            }
            record
        })
        .collect();
    let flipped = front(
        &inverted,
        ObjectiveSpec::new(ObjectiveKind::Yield, Direction::Minimize),
        ObjectiveSpec::new(ObjectiveKind::NormalizedArea, Direction::Minimize),
    )
    .unwrap();
    let flipped_iterations: Vec<usize> =
        flipped.iter().map(|member| member.iteration).collect();
    assert_eq!(flipped_iterations, baseline);
}

#[test]
fn missing_objective_is_reported_with_the_iteration() {
    let mut broken = record(7, 1.0, 1.0);
    broken.raw.remove(Y);
    let (x, y) = max_specs();
    let err = front(&[broken], x, y).unwrap_err();
    assert_eq!(err.info().code, "front-missing-objective");
    assert_eq!(err.info().context["iteration"], "7");
}

#[test]
fn dominance_requires_a_strict_edge() {
    assert!(dominates(&[2.0, 2.0], &[2.0, 1.0]));
    assert!(!dominates(&[2.0, 2.0], &[2.0, 2.0]));
    assert!(!dominates(&[3.0, 1.0], &[1.0, 3.0]));
}

proptest! {
    #[test]
    fn no_front_member_dominates_another(
        values in prop::collection::vec((0.0f64..100.0, 0.0f64..100.0), 1..40),
    ) {
        let records: Vec<ExperimentRecord> = values
            .iter()
            .enumerate()
            .map(|(index, (x, y))| record(index + 1, *x, *y))
            .collect();
        let (x, y) = max_specs();
        let members = front(&records, x, y).unwrap();
        prop_assert!(!members.is_empty());
        for a in &members {
            for b in &members {
                if a.iteration != b.iteration {
                    prop_assert!(!dominates(
                        &[a.raw[X], a.raw[Y]],
                        &[b.raw[X], b.raw[Y]],
                    ));
                }
            }
        }
    }

    #[test]
    fn every_non_member_is_dominated_or_tied(
        values in prop::collection::vec((0.0f64..100.0, 0.0f64..100.0), 1..40),
    ) {
        let records: Vec<ExperimentRecord> = values
            .iter()
            .enumerate()
            .map(|(index, (x, y))| record(index + 1, *x, *y))
            .collect();
        let (x, y) = max_specs();
        let members = front(&records, x, y).unwrap();
        for outside in records.iter().filter(|record| {
            !members.iter().any(|member| member.iteration == record.iteration)
        }) {
            let covered = members.iter().any(|member| {
                dominates(
                    &[member.raw[X], member.raw[Y]],
                    &[outside.raw[X], outside.raw[Y]],
                ) || (member.raw[X] >= outside.raw[X] && member.raw[Y] >= outside.raw[Y])
            });
            prop_assert!(covered);
        }
    }
}
