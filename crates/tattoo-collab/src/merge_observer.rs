//! The package-merge observer, feeding `TesterStatus.merging_atoms`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

const QLOP_TIMEOUT: Duration = Duration::from_secs(20);

/// Reports packages currently merging, as best known right now.
#[async_trait]
pub trait MergeObserver: Send + Sync {
    /// Never fails the caller: an unavailable or timed-out `qlop` yields an
    /// empty list, matching "used for status display only".
    async fn merging_atoms(&self) -> Vec<String>;
}

pub struct QlopObserver {
    binary: String,
}

impl Default for QlopObserver {
    fn default() -> Self {
        QlopObserver { binary: "qlop".to_string() }
    }
}

impl QlopObserver {
    pub fn new(binary: impl Into<String>) -> Self {
        QlopObserver { binary: binary.into() }
    }
}

#[async_trait]
impl MergeObserver for QlopObserver {
    async fn merging_atoms(&self) -> Vec<String> {
        let run = async {
            Command::new(&self.binary)
                .arg("--running")
                .arg("--nocolor")
                .output()
                .await
        };
        match timeout(QLOP_TIMEOUT, run).await {
            Ok(Ok(out)) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .filter_map(|line| line.split_whitespace().last())
                    .map(str::to_string)
                    .collect()
            }
            Ok(Ok(_)) => Vec::new(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "qlop spawn failed");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!("qlop timed out");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_missing_qlop_binary_yields_an_empty_list_not_an_error() {
        let observer = QlopObserver::new("/no/such/qlop/binary");
        assert_eq!(observer.merging_atoms().await, Vec::<String>::new());
    }
}
