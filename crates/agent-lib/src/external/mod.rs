//! Out-of-process detection pipeline adapter
//!
//! Delegates a cycle's detection to an external program: the usage snapshot
//! is serialized into a versioned JSON envelope on the child's stdin, and
//! the child answers with a contention list on stdout. Any transport or
//! decode failure surfaces as an error from `consume`; nothing is forwarded
//! downstream on a failed exchange, and the host pipeline keeps running.

use crate::models::UsageSnapshot;
use crate::pipeline::{async_trait, Contentions, Stage};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Version stamped on every request and expected back on every reply.
pub const WIRE_VERSION: u32 = 1;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct SnapshotEnvelope<'a> {
    version: u32,
    snapshot: &'a UsageSnapshot,
}

#[derive(Debug, Deserialize)]
struct ContentionReply {
    version: u32,
    #[serde(default)]
    contentions: Contentions,
}

/// Why an exchange with the external pipeline failed.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to spawn external pipeline: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("i/o with external pipeline failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("external pipeline exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("external pipeline produced no reply within {0:?}")]
    Timeout(Duration),
    #[error("malformed reply from external pipeline: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported reply version {got} (this agent speaks {WIRE_VERSION})")]
    VersionMismatch { got: u32 },
}

/// Drop-in stage that runs detection in an external program.
pub struct ExternalPipelineStage {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    downstream: Box<dyn Stage<Contentions>>,
}

impl ExternalPipelineStage {
    pub fn new(command: impl Into<String>, downstream: Box<dyn Stage<Contentions>>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            downstream,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&mut self, snapshot: &UsageSnapshot) -> std::result::Result<Contentions, AdapterError> {
        let payload = serde_json::to_vec(&SnapshotEnvelope {
            version: WIRE_VERSION,
            snapshot,
        })?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The child is reaped if we bail out on timeout below.
            .kill_on_drop(true)
            .spawn()
            .map_err(AdapterError::Spawn)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            // Dropping stdin signals end of input to the child.
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(AdapterError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            return Err(AdapterError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let reply: ContentionReply = serde_json::from_slice(&output.stdout)?;
        if reply.version != WIRE_VERSION {
            return Err(AdapterError::VersionMismatch { got: reply.version });
        }
        Ok(reply.contentions)
    }
}

#[async_trait]
impl Stage<UsageSnapshot> for ExternalPipelineStage {
    async fn consume(&mut self, snapshot: &UsageSnapshot) -> Result<()> {
        let contentions = self.exchange(snapshot).await?;
        debug!(
            count = contentions.len(),
            command = %self.command,
            "External pipeline replied"
        );
        self.downstream.consume(&contentions).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Contention, NodeResources};
    use std::sync::{Arc, Mutex};

    struct RecordingSink {
        cycles: Arc<Mutex<Vec<Contentions>>>,
    }

    #[async_trait]
    impl Stage<Contentions> for RecordingSink {
        async fn consume(&mut self, input: &Contentions) -> Result<()> {
            self.cycles.lock().unwrap().push(input.clone());
            Ok(())
        }
    }

    fn snapshot() -> UsageSnapshot {
        UsageSnapshot {
            node_name: "node-1".to_string(),
            timestamp: 1_000,
            total: Some(NodeResources {
                cpus: Some(8.0),
                memory_bytes: None,
            }),
            executors: vec![],
        }
    }

    fn shell_stage(script: &str) -> (ExternalPipelineStage, Arc<Mutex<Vec<Contentions>>>) {
        let cycles = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            cycles: cycles.clone(),
        };
        let stage = ExternalPipelineStage::new("/bin/sh", Box::new(sink))
            .with_args(vec!["-c".to_string(), script.to_string()]);
        (stage, cycles)
    }

    #[tokio::test]
    async fn test_round_trip_forwards_contentions() {
        let reply = r#"{"version":1,"contentions":[{"kind":"cpu","magnitude":-1.5}]}"#;
        let (mut stage, cycles) = shell_stage(&format!("cat >/dev/null; printf '%s' '{reply}'"));

        stage.consume(&snapshot()).await.unwrap();

        let forwarded = cycles.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0], vec![Contention::cpu(-1.5)]);
    }

    #[tokio::test]
    async fn test_empty_contention_reply() {
        let reply = r#"{"version":1,"contentions":[]}"#;
        let (mut stage, cycles) = shell_stage(&format!("cat >/dev/null; printf '%s' '{reply}'"));

        stage.consume(&snapshot()).await.unwrap();

        let forwarded = cycles.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].is_empty());
    }

    #[tokio::test]
    async fn test_child_reads_the_snapshot_envelope() {
        // Echo the envelope's version back as the reply version
        let script = r#"ver=$(sed 's/.*"version":\([0-9]*\).*/\1/'); printf '{"version":%s,"contentions":[]}' "$ver""#;
        let (mut stage, cycles) = shell_stage(script);

        stage.consume(&snapshot()).await.unwrap();
        assert_eq!(cycles.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_an_error() {
        let (mut stage, cycles) = shell_stage("cat >/dev/null; printf 'not json'");

        let err = stage.consume(&snapshot()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterError>(),
            Some(AdapterError::Decode(_))
        ));
        assert!(cycles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let reply = r#"{"version":99,"contentions":[]}"#;
        let (mut stage, cycles) = shell_stage(&format!("cat >/dev/null; printf '%s' '{reply}'"));

        let err = stage.consume(&snapshot()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterError>(),
            Some(AdapterError::VersionMismatch { got: 99 })
        ));
        assert!(cycles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaced() {
        let (mut stage, cycles) = shell_stage("cat >/dev/null; echo boom >&2; exit 3");

        let err = stage.consume(&snapshot()).await.unwrap_err();
        match err.downcast_ref::<AdapterError>() {
            Some(AdapterError::NonZeroExit { code, stderr }) => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cycles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_kills_the_exchange() {
        let (stage, cycles) = shell_stage("cat >/dev/null; sleep 10");
        let mut stage = stage.with_timeout(Duration::from_millis(100));

        let err = stage.consume(&snapshot()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterError>(),
            Some(AdapterError::Timeout(_))
        ));
        assert!(cycles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_surfaced() {
        let cycles = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            cycles: cycles.clone(),
        };
        let mut stage =
            ExternalPipelineStage::new("/nonexistent/pipeline-binary", Box::new(sink));

        let err = stage.consume(&snapshot()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AdapterError>(),
            Some(AdapterError::Spawn(_))
        ));
        assert!(cycles.lock().unwrap().is_empty());
    }
}
