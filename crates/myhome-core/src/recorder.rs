// Append-only JSONL log of inbound device events, one file per device.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct Recorder {
    dir: PathBuf,
}

impl Recorder {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::Config {
                message: format!("events dir {}: {e}", dir.display()),
            })?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, device_id: &str) -> PathBuf {
        let safe: String = device_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }

    /// Append `{ts, kind, event}`. Failures are logged, never returned.
    pub async fn record(&self, device_id: &str, kind: &str, event: Value) {
        let path = self.path_for(device_id);
        let line = json!({ "ts": Utc::now(), "kind": kind, "event": event });
        if let Err(e) = append_line(&path, &line).await {
            warn!(device = device_id, path = %path.display(), error = %e, "event not recorded");
        }
    }
}

async fn append_line(path: &Path, line: &Value) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(line)?;
    bytes.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&bytes).await?;
    file.flush().await
}
