//! Append-only audit log for raw measurement samples.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

use vol_core::errors::ErrorInfo;
use vol_core::{now_timestamp, Variable, VolError};

/// CSV sink recording every raw sample drawn during a campaign.
///
/// One row per sample: iteration, timestamp, the full parameter set, the
/// sample's index within its measurement window and the raw value. Rows are
/// flushed immediately so the log survives a crash mid-iteration.
#[derive(Debug)]
pub struct AuditLog {
    writer: csv::Writer<File>,
    variable_names: Vec<String>,
}

impl AuditLog {
    /// Creates the log file and writes the header row.
    pub fn create(path: &Path, variables: &[Variable]) -> Result<Self, VolError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| audit_error("audit-open", path, err.to_string()))?;
        let fresh = file
            .metadata()
            .map_err(|err| audit_error("audit-stat", path, err.to_string()))?
            .len()
            == 0;
        let variable_names: Vec<String> = variables
            .iter()
            .map(|variable| variable.name.clone())
            .collect();
        let mut writer = csv::Writer::from_writer(file);
        // A resumed run reopens the existing log; the header is written once.
        if fresh {
            let mut header = vec!["iteration".to_string(), "timestamp".to_string()];
            header.extend(variable_names.iter().cloned());
            header.push("sample_index".to_string());
            header.push("raw_value".to_string());
            writer
                .write_record(&header)
                .map_err(|err| audit_error("audit-header", path, err.to_string()))?;
            writer
                .flush()
                .map_err(|err| audit_error("audit-flush", path, err.to_string()))?;
        }
        Ok(Self {
            writer,
            variable_names,
        })
    }

    /// Appends one sample row and flushes it to disk.
    pub fn append(
        &mut self,
        iteration: usize,
        parameters: &BTreeMap<String, f64>,
        sample_index: usize,
        raw_value: f64,
    ) -> Result<(), VolError> {
        let mut row = vec![iteration.to_string(), now_timestamp()];
        for name in &self.variable_names {
            row.push(
                parameters
                    .get(name)
                    .map(|value| value.to_string())
                    .unwrap_or_default(),
            );
        }
        row.push(sample_index.to_string());
        row.push(raw_value.to_string());
        self.writer.write_record(&row).map_err(|err| {
            VolError::Serde(
                ErrorInfo::new("audit-append", err.to_string())
                    .with_context("iteration", iteration.to_string()),
            )
        })?;
        self.writer.flush().map_err(|err| {
            VolError::Serde(
                ErrorInfo::new("audit-flush", err.to_string())
                    .with_context("iteration", iteration.to_string()),
            )
        })
    }
}

fn audit_error(code: &str, path: &Path, message: String) -> VolError {
    VolError::Serde(ErrorInfo::new(code, message).with_context("path", path.display().to_string()))
}
