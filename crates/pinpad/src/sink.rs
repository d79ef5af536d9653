use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use pinpad_core::config::{FirestoreConfig, SinkConfig};
use pinpad_core::record::AttemptRecord;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to remote store failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("remote store rejected record ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("writing attempt log: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding record: {0}")]
    Encode(#[from] serde_json::Error),
}

// The URL is stripped so request errors never echo endpoint details into logs.
impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        SinkError::Http(e.without_url())
    }
}

/// Append-only destination for attempt records.
#[async_trait]
pub trait AttemptSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn record(&self, record: &AttemptRecord) -> Result<(), SinkError>;
}

pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn AttemptSink>> {
    let sink: Arc<dyn AttemptSink> = match config {
        SinkConfig::Log => Arc::new(LogSink),
        SinkConfig::Jsonl { path } => Arc::new(JsonlSink::new(path.clone())),
        SinkConfig::Firestore(fs) => {
            Arc::new(FirestoreSink::new(fs).context("creating Firestore client")?)
        }
    };
    Ok(sink)
}

/// Writes records to the log only.
pub struct LogSink;

#[async_trait]
impl AttemptSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn record(&self, record: &AttemptRecord) -> Result<(), SinkError> {
        info!(
            step = %record.step,
            matched = ?record.matched,
            created_at = %record.created_at,
            "attempt"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a local file.
pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends from concurrently spawned writes.
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl AttemptSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn record(&self, record: &AttemptRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Adds documents through the Firestore REST API.
pub struct FirestoreSink {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl FirestoreSink {
    pub fn new(config: &FirestoreConfig) -> Result<Self, SinkError> {
        Self::with_endpoint(
            &config.documents_url(),
            &config.api_key,
            Duration::from_millis(config.timeout_ms),
        )
    }

    /// Point at an arbitrary collection URL (emulator, tests).
    pub fn with_endpoint(
        collection_url: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: collection_url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// Firestore's typed-field encoding of a record.
pub fn firestore_document(record: &AttemptRecord) -> Value {
    let mut fields = json!({
        "pin": { "stringValue": record.pin },
        "step": { "stringValue": record.step.as_str() },
        "createdAt": {
            "timestampValue": record.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        },
    });
    if let Some(matched) = record.matched {
        fields["match"] = json!({ "booleanValue": matched });
    }
    json!({ "fields": fields })
}

#[async_trait]
impl AttemptSink for FirestoreSink {
    fn name(&self) -> &'static str {
        "firestore"
    }

    async fn record(&self, record: &AttemptRecord) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&firestore_document(record))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Fire-and-forget front for a sink.
///
/// Each record is written on its own task. The caller gets the handle back
/// but the daemon never awaits it: a failed write is logged and dropped,
/// never retried, and never reaches the PIN flow.
#[derive(Clone)]
pub struct Recorder {
    sink: Arc<dyn AttemptSink>,
}

impl Recorder {
    pub fn new(sink: Arc<dyn AttemptSink>) -> Self {
        Self { sink }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    pub fn record(&self, record: AttemptRecord) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            match sink.record(&record).await {
                Ok(()) => debug!(sink = sink.name(), step = %record.step, "attempt recorded"),
                Err(e) => warn!(
                    sink = sink.name(),
                    step = %record.step,
                    error = %e,
                    "failed to record attempt"
                ),
            }
        })
    }
}
