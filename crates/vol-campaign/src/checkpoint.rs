//! Durable campaign checkpoints.
//!
//! Each run directory holds a live `checkpoint/` directory with three
//! co-located artifacts written at every iteration boundary: the opaque
//! optimizer state blob, the tabular experiment-record file and a metadata
//! record. A save is assembled in a staging directory and swapped in with
//! directory renames, so a crash mid-save never damages the live
//! checkpoint. All three artifacts must be present and mutually consistent
//! for a load to succeed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vol_core::errors::ErrorInfo;
use vol_core::{now_timestamp, CampaignStatus, ExperimentRecord, SchemaVersion, VolError};

use crate::config::CampaignConfig;

/// Live checkpoint directory name inside the run directory.
pub const CHECKPOINT_DIR: &str = "checkpoint";
/// Staging directory a save is assembled in before the swap.
pub const STAGING_DIR: &str = "checkpoint.staging";
/// Previous live checkpoint, present only while a swap is in flight.
pub const BACKUP_DIR: &str = "checkpoint.old";
/// Optimizer state blob filename.
pub const OPTIMIZER_FILE: &str = "optimizer.bin";
/// Tabular experiment-record filename.
pub const RECORDS_FILE: &str = "records.csv";
/// Metadata record filename.
pub const METADATA_FILE: &str = "metadata.json";
/// Raw sample audit log filename.
pub const AUDIT_FILE: &str = "audit.csv";

/// Metadata record persisted alongside the optimizer blob and record table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Layout version of the three-artifact checkpoint.
    pub schema_version: SchemaVersion,
    /// Timestamp of the last save.
    pub created_at: String,
    /// Full configuration snapshot, sufficient to rebuild the campaign.
    pub config: CampaignConfig,
    /// SHA-256 of the configuration at start, for drift detection.
    pub config_hash: String,
    /// Iterations completed when the checkpoint was written.
    pub iteration: usize,
    /// Campaign status at save time.
    pub status: CampaignStatus,
    /// Observation count the optimizer blob claims to hold.
    pub observed: usize,
}

/// Point-in-time serialization of a campaign.
#[derive(Debug, Clone)]
pub struct CheckpointPayload {
    /// Metadata record.
    pub metadata: CheckpointMetadata,
    /// Ordered, append-only experiment records.
    pub records: Vec<ExperimentRecord>,
    /// Exported optimizer state.
    pub optimizer_blob: Vec<u8>,
}

impl CheckpointPayload {
    /// Writes the three artifacts into the run directory's live checkpoint.
    ///
    /// The full artifact set is assembled in a staging directory first, with
    /// the metadata record written last; a staging directory containing it
    /// is therefore complete. The staged checkpoint then replaces the live
    /// one through directory renames, demoting the previous live checkpoint
    /// to a backup that is removed once the swap lands. A crash anywhere in
    /// the sequence leaves at least one complete checkpoint behind, and
    /// [`CheckpointPayload::load`] finishes an interrupted swap.
    pub fn store(&self, dir: &Path) -> Result<(), VolError> {
        let live = dir.join(CHECKPOINT_DIR);
        let staging = dir.join(STAGING_DIR);
        let backup = dir.join(BACKUP_DIR);
        remove_dir(&staging)?;
        fs::create_dir_all(&staging).map_err(|err| io_error("checkpoint-mkdir", &staging, err))?;
        let blob_path = staging.join(OPTIMIZER_FILE);
        fs::write(&blob_path, &self.optimizer_blob)
            .map_err(|err| io_error("checkpoint-blob-write", &blob_path, err))?;
        write_records(&staging.join(RECORDS_FILE), &self.metadata.config, &self.records)?;
        let metadata_path = staging.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(&self.metadata).map_err(|err| {
            VolError::Serde(
                ErrorInfo::new("checkpoint-metadata-serialize", err.to_string())
                    .with_context("path", metadata_path.display().to_string()),
            )
        })?;
        fs::write(&metadata_path, json)
            .map_err(|err| io_error("checkpoint-metadata-write", &metadata_path, err))?;

        remove_dir(&backup)?;
        if live.exists() {
            fs::rename(&live, &backup).map_err(|err| io_error("checkpoint-swap", &live, err))?;
        }
        fs::rename(&staging, &live).map_err(|err| io_error("checkpoint-swap", &staging, err))?;
        remove_dir(&backup)
    }

    /// Restores a payload from the run directory, verifying consistency.
    ///
    /// An interrupted swap is finished first: a complete staged checkpoint
    /// is promoted to live, otherwise the demoted backup is restored.
    pub fn load(dir: &Path) -> Result<Self, VolError> {
        let dir = recover_live(dir)?;
        let dir = dir.as_path();
        let metadata_path = dir.join(METADATA_FILE);
        let contents = fs::read_to_string(&metadata_path)
            .map_err(|err| io_error("checkpoint-metadata-read", &metadata_path, err))?;
        let metadata: CheckpointMetadata = serde_json::from_str(&contents).map_err(|err| {
            VolError::Serde(
                ErrorInfo::new("checkpoint-metadata-parse", err.to_string())
                    .with_context("path", metadata_path.display().to_string()),
            )
        })?;
        let supported = SchemaVersion::default();
        if !supported.accepts(&metadata.schema_version) {
            return Err(VolError::Serde(
                ErrorInfo::new("checkpoint-schema", "unsupported checkpoint layout version")
                    .with_context("found", format!("{:?}", metadata.schema_version)),
            ));
        }
        let records = read_records(&dir.join(RECORDS_FILE), &metadata.config)?;
        let blob_path = dir.join(OPTIMIZER_FILE);
        let optimizer_blob =
            fs::read(&blob_path).map_err(|err| io_error("checkpoint-blob-read", &blob_path, err))?;

        if records.len() != metadata.iteration || metadata.observed != metadata.iteration {
            return Err(VolError::Serde(
                ErrorInfo::new(
                    "checkpoint-inconsistent",
                    "record table, metadata and optimizer blob disagree",
                )
                .with_context("records", records.len().to_string())
                .with_context("iteration", metadata.iteration.to_string())
                .with_context("observed", metadata.observed.to_string())
                .with_hint("the checkpoint was torn; restore the previous save"),
            ));
        }
        Ok(Self {
            metadata,
            records,
            optimizer_blob,
        })
    }
}

/// Resolves the run directory for a named run under a checkpoint root.
pub fn run_directory(root: &Path, run_name: &str) -> PathBuf {
    root.join(run_name)
}

/// Resolves the live checkpoint directory, finishing an interrupted swap.
///
/// The metadata record is written last within the staging directory, so a
/// staging directory containing it holds a complete checkpoint newer than
/// any backup. An incomplete staging directory is ignored; the next save
/// clears it.
fn recover_live(dir: &Path) -> Result<PathBuf, VolError> {
    let live = dir.join(CHECKPOINT_DIR);
    if live.join(METADATA_FILE).is_file() {
        return Ok(live);
    }
    for interrupted in [STAGING_DIR, BACKUP_DIR] {
        let candidate = dir.join(interrupted);
        if candidate.join(METADATA_FILE).is_file() {
            fs::rename(&candidate, &live)
                .map_err(|err| io_error("checkpoint-recover", &candidate, err))?;
            return Ok(live);
        }
    }
    Err(VolError::Serde(
        ErrorInfo::new("checkpoint-missing", "run directory holds no complete checkpoint")
            .with_context("path", dir.display().to_string()),
    ))
}

fn remove_dir(path: &Path) -> Result<(), VolError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error("checkpoint-clean", path, err)),
    }
}

fn write_records(
    path: &Path,
    config: &CampaignConfig,
    records: &[ExperimentRecord],
) -> Result<(), VolError> {
    let specs = config.resolve_objectives()?;
    let mut writer =
        csv::Writer::from_path(path).map_err(|err| csv_error("records-create", path, err))?;
    let mut header = vec![
        "iteration".to_string(),
        "timestamp".to_string(),
        "converged".to_string(),
    ];
    for variable in &config.variables {
        header.push(variable.name.clone());
    }
    for spec in &specs {
        header.push(format!("{}_raw", spec.kind.as_str()));
        header.push(format!("{}_signed", spec.kind.as_str()));
    }
    writer
        .write_record(&header)
        .map_err(|err| csv_error("records-header", path, err))?;
    for record in records {
        let mut row = vec![
            record.iteration.to_string(),
            record.timestamp.clone(),
            record.converged.to_string(),
        ];
        for variable in &config.variables {
            row.push(field(&record.parameters, &variable.name, record.iteration)?);
        }
        for spec in &specs {
            row.push(field(&record.raw, spec.kind.as_str(), record.iteration)?);
            row.push(field(&record.signed, spec.kind.as_str(), record.iteration)?);
        }
        writer
            .write_record(&row)
            .map_err(|err| csv_error("records-append", path, err))?;
    }
    writer
        .flush()
        .map_err(|err| io_error("records-flush", path, err))
}

fn read_records(path: &Path, config: &CampaignConfig) -> Result<Vec<ExperimentRecord>, VolError> {
    let specs = config.resolve_objectives()?;
    let mut reader =
        csv::Reader::from_path(path).map_err(|err| csv_error("records-open", path, err))?;
    let headers = reader
        .headers()
        .map_err(|err| csv_error("records-headers", path, err))?
        .clone();
    let column = |name: &str| -> Result<usize, VolError> {
        headers.iter().position(|header| header == name).ok_or_else(|| {
            VolError::Serde(
                ErrorInfo::new("records-column-missing", "record table lacks a column")
                    .with_context("column", name.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })
    };
    let iteration_col = column("iteration")?;
    let timestamp_col = column("timestamp")?;
    let converged_col = column("converged")?;
    let variable_cols: Vec<(String, usize)> = config
        .variables
        .iter()
        .map(|variable| Ok((variable.name.clone(), column(&variable.name)?)))
        .collect::<Result<_, VolError>>()?;
    let objective_cols: Vec<(String, usize, usize)> = specs
        .iter()
        .map(|spec| {
            let name = spec.kind.as_str().to_string();
            Ok((
                name.clone(),
                column(&format!("{name}_raw"))?,
                column(&format!("{name}_signed"))?,
            ))
        })
        .collect::<Result<_, VolError>>()?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|err| csv_error("records-row", path, err))?;
        let cell = |idx: usize| -> &str { row.get(idx).unwrap_or_default() };
        let iteration = cell(iteration_col).parse::<usize>().map_err(|err| {
            parse_error(path, "iteration", err.to_string())
        })?;
        let mut parameters = BTreeMap::new();
        for (name, idx) in &variable_cols {
            parameters.insert(name.clone(), parse_f64(path, name, cell(*idx))?);
        }
        let mut raw = BTreeMap::new();
        let mut signed = BTreeMap::new();
        for (name, raw_idx, signed_idx) in &objective_cols {
            raw.insert(name.clone(), parse_f64(path, name, cell(*raw_idx))?);
            signed.insert(name.clone(), parse_f64(path, name, cell(*signed_idx))?);
        }
        records.push(ExperimentRecord {
            iteration,
            timestamp: cell(timestamp_col).to_string(),
            parameters,
            raw,
            signed,
            converged: cell(converged_col) == "true",
        });
    }
    Ok(records)
}

/// Builds a metadata record for the current campaign position.
pub fn metadata_now(
    config: &CampaignConfig,
    config_hash: &str,
    iteration: usize,
    status: CampaignStatus,
    observed: usize,
) -> CheckpointMetadata {
    CheckpointMetadata {
        schema_version: SchemaVersion::default(),
        created_at: now_timestamp(),
        config: config.clone(),
        config_hash: config_hash.to_string(),
        iteration,
        status,
        observed,
    }
}

fn field(
    map: &BTreeMap<String, f64>,
    key: &str,
    iteration: usize,
) -> Result<String, VolError> {
    map.get(key).map(|value| value.to_string()).ok_or_else(|| {
        VolError::Serde(
            ErrorInfo::new("records-field-missing", "record lacks a required value")
                .with_context("field", key.to_string())
                .with_context("iteration", iteration.to_string()),
        )
    })
}

fn parse_f64(path: &Path, column: &str, text: &str) -> Result<f64, VolError> {
    text.parse::<f64>()
        .map_err(|err| parse_error(path, column, err.to_string()))
}

fn parse_error(path: &Path, column: &str, message: String) -> VolError {
    VolError::Serde(
        ErrorInfo::new("records-parse", message)
            .with_context("column", column.to_string())
            .with_context("path", path.display().to_string()),
    )
}

fn csv_error(code: &str, path: &Path, err: csv::Error) -> VolError {
    VolError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

fn io_error(code: &str, path: &Path, err: std::io::Error) -> VolError {
    VolError::Serde(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}
