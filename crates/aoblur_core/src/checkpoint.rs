//! Persistence of the best parameter vector seen during a fit.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{AoError, AoResult};
use crate::params::ParameterVector;

/// A stored parameter vector together with the loss it achieved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Zero-based epoch after which the parameters were stored.
    pub epoch: usize,
    pub loss: f64,
    pub params: ParameterVector,
}

/// Where a trainer keeps its best checkpoint.
///
/// `save` is only called at epoch boundaries, never while a gradient is
/// being computed.
pub trait CheckpointStore {
    fn save(&mut self, checkpoint: &Checkpoint) -> AoResult<()>;

    /// The most recently saved checkpoint.
    fn load(&self) -> AoResult<Checkpoint>;
}

/// Keeps the checkpoint in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpoint {
    latest: Option<Checkpoint>,
}

impl InMemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpoint {
    fn save(&mut self, checkpoint: &Checkpoint) -> AoResult<()> {
        self.latest = Some(*checkpoint);
        Ok(())
    }

    fn load(&self) -> AoResult<Checkpoint> {
        self.latest.ok_or(AoError::NoCheckpoint)
    }
}

/// Writes the checkpoint as pretty JSON.
///
/// Each save goes to a sibling temporary file that is then renamed over the
/// target, so the file on disk is always a complete checkpoint.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpoint {
    path: PathBuf,
}

impl JsonFileCheckpoint {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for JsonFileCheckpoint {
    fn save(&mut self, checkpoint: &Checkpoint) -> AoResult<()> {
        let tmp = self.temp_path();
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, checkpoint)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> AoResult<Checkpoint> {
        if !self.path.exists() {
            return Err(AoError::NoCheckpoint);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
