use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::hybrid::{HybridProgress, HybridSolveOptions, HybridSolverStats};
use crate::OptimizeRequest;

#[derive(Clone, Debug, Serialize)]
pub struct LoggerConfig {
    pub output_path: PathBuf,
    pub format: LogFormat,
    pub flush_interval: usize,
}

#[derive(Clone, Debug, Serialize)]
pub enum LogFormat {
    JsonLines,
}

/// One line of a persisted solver run.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    SolveStart {
        instance_fingerprint: String,
        orders: usize,
        couriers: usize,
        options: HybridSolveOptions,
    },
    Snapshot {
        snapshot: HybridProgress,
    },
    SolveComplete {
        best_distance: f64,
        stats: HybridSolverStats,
    },
}

pub struct RunRecorder {
    config: LoggerConfig,
    writer: BufWriter<File>,
    events_written: usize,
}

impl LoggerConfig {
    pub fn ensure_writer(&self) -> std::io::Result<RunRecorder> {
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.output_path)?;
        let writer = BufWriter::new(file);
        Ok(RunRecorder {
            config: self.clone(),
            writer,
            events_written: 0,
        })
    }
}

impl RunRecorder {
    pub fn record_event(&mut self, event: &RunEvent) {
        match self.config.format {
            LogFormat::JsonLines => {
                if serde_json::to_writer(&mut self.writer, event).is_ok() {
                    let _ = self.writer.write_all(b"\n");
                    self.events_written += 1;
                    if self.config.flush_interval > 0
                        && self.events_written % self.config.flush_interval == 0
                    {
                        let _ = self.writer.flush();
                    }
                }
            }
        }
    }

    pub fn finalize(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for RunRecorder {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

/// Stable hex digest identifying a request's orders and couriers.
pub fn fingerprint_request(request: &OptimizeRequest) -> String {
    let mut hasher = Hasher::new();
    if let Ok(serialized) = serde_json::to_vec(request) {
        hasher.update(&serialized);
    }
    hasher.finalize().to_hex().to_string()
}

pub fn default_log_path(base: impl AsRef<Path>, fingerprint: &str) -> PathBuf {
    let mut path = base.as_ref().to_path_buf();
    path.push(format!("run_{}.jsonl", fingerprint));
    path
}
