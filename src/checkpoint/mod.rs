use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::CheckpointConfig;
use crate::recovery::BotError;

const CHECKPOINT_VERSION: u32 = 1;

/// Versioned state snapshot written to disk
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint<T> {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub label: String,
    pub state: T,
}

/// Durable engine-state snapshots with bounded retention
///
/// Writes go to a temp file first and land via rename, so a crash mid-write
/// never leaves a truncated checkpoint as the latest one.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    config: CheckpointConfig,
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Internal(format!("checkpoint io: {err}"))
    }
}

impl CheckpointStore {
    pub fn new(config: CheckpointConfig) -> Self {
        Self { config }
    }

    fn dir(&self) -> &Path {
        Path::new(&self.config.dir)
    }

    fn extension(&self) -> &'static str {
        if self.config.compress {
            "json.gz"
        } else {
            "json"
        }
    }

    /// True when the auto-save interval has elapsed since the last save
    pub fn due(&self, last_saved: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_saved {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.config.interval_secs as i64
            }
        }
    }

    pub fn save<T: Serialize>(&self, state: &T, label: &str) -> Result<PathBuf, BotError> {
        fs::create_dir_all(self.dir())?;

        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            taken_at: Utc::now(),
            label: label.to_string(),
            state,
        };
        let json = serde_json::to_vec_pretty(&checkpoint)?;

        let file_name = format!(
            "checkpoint_{}_{}.{}",
            checkpoint.taken_at.format("%Y%m%d_%H%M%S%3f"),
            label,
            self.extension()
        );
        let final_path = self.dir().join(&file_name);
        let tmp_path = self.dir().join(format!("{file_name}.tmp"));

        {
            let mut file = fs::File::create(&tmp_path)?;
            if self.config.compress {
                let mut encoder = GzEncoder::new(&mut file, Compression::default());
                encoder.write_all(&json)?;
                encoder.finish()?;
            } else {
                file.write_all(&json)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;

        tracing::debug!(path = %final_path.display(), label, "checkpoint saved");
        self.prune()?;
        Ok(final_path)
    }

    /// Most recent checkpoint, by file name (names sort chronologically)
    pub fn restore_latest<T: DeserializeOwned>(&self) -> Result<Checkpoint<T>, BotError> {
        let latest = self
            .list()?
            .into_iter()
            .next_back()
            .ok_or_else(|| BotError::Internal("no checkpoint found".to_string()))?;
        self.restore(&latest)
    }

    pub fn restore<T: DeserializeOwned>(&self, path: &Path) -> Result<Checkpoint<T>, BotError> {
        let mut raw = Vec::new();
        fs::File::open(path)?.read_to_end(&mut raw)?;

        let json = if path.to_string_lossy().ends_with(".gz") {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| BotError::Data(format!("corrupt checkpoint: {e}")))?;
            out
        } else {
            raw
        };

        let checkpoint: Checkpoint<T> = serde_json::from_slice(&json)
            .map_err(|e| BotError::Data(format!("corrupt checkpoint: {e}")))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(BotError::Data(format!(
                "unsupported checkpoint version {}",
                checkpoint.version
            )));
        }

        tracing::info!(
            path = %path.display(),
            taken_at = %checkpoint.taken_at,
            "checkpoint restored"
        );
        Ok(checkpoint)
    }

    /// Checkpoint files in chronological order
    pub fn list(&self) -> Result<Vec<PathBuf>, BotError> {
        if !self.dir().exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(self.dir())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("checkpoint_") && !n.ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Drop the oldest checkpoints beyond the retention cap
    fn prune(&self) -> Result<(), BotError> {
        let paths = self.list()?;
        if paths.len() <= self.config.max_checkpoints {
            return Ok(());
        }
        let excess = paths.len() - self.config.max_checkpoints;
        for path in &paths[..excess] {
            fs::remove_file(path)?;
            tracing::debug!(path = %path.display(), "old checkpoint pruned");
        }
        Ok(())
    }
}
