//! Line-delimited JSON protocol between the supervisor and worker processes
//!
//! The supervisor writes [`WorkerRequest`]s to a worker's stdin; the worker
//! answers on stdout with one [`WorkerEvent::Started`] followed by one
//! [`WorkerEvent::Finished`] per task.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Batch-unique task identifier
pub type TaskId = u64;

/// Supervisor to worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Extract one file
    Task { task_id: TaskId, path: PathBuf },
    /// Exit once the current task is drained
    Stop,
}

/// Worker to supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// Extraction began; the page count scales the deadline
    Started { task_id: TaskId, page_count: u32 },
    /// Extraction ended
    Finished {
        task_id: TaskId,
        outcome: ExtractionOutcome,
        duration: Duration,
    },
}

/// Terminal state of one extraction: exactly one of content or error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Extracted { content: String },
    Failed { error: String },
}

impl ExtractionOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Extracted { content } => Some(content),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Extracted { .. } => None,
            Self::Failed { error } => Some(error),
        }
    }
}

/// Serialize one message as a protocol line (newline included)
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_request(line: &str) -> Result<WorkerRequest> {
    Ok(serde_json::from_str(line.trim())?)
}

pub fn decode_event(line: &str) -> Result<WorkerEvent> {
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let line = encode_line(&WorkerEvent::Started {
            task_id: 7,
            page_count: 3,
        })
        .unwrap();
        assert_eq!(line, "{\"type\":\"started\",\"task_id\":7,\"page_count\":3}\n");

        let finished = decode_event(
            r#"{"type":"finished","task_id":7,"outcome":{"status":"failed","error":"Reader Error: x"},"duration":{"secs":1,"nanos":0}}"#,
        )
        .unwrap();
        match finished {
            WorkerEvent::Finished { outcome, duration, .. } => {
                assert_eq!(outcome.error(), Some("Reader Error: x"));
                assert_eq!(outcome.content(), None);
                assert_eq!(duration, Duration::from_secs(1));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_stop_request() {
        assert_eq!(decode_request("{\"type\":\"stop\"}\n").unwrap(), WorkerRequest::Stop);
        assert!(decode_request("[\"START\", 1]").is_err());
    }
}
