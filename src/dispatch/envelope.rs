//! Line framing between the primary and its workers

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line on a worker's stdin or stdout
///
/// Workers send `ready` once, `busy` whenever they reach their concurrency
/// cap and one `done` per inbound message they finished handling.
/// Application payloads travel as `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    Ready,
    Busy,
    Done { busy: bool },
    Message { body: Value },
}

impl Envelope {
    /// Wraps an application message
    pub fn message<T: Serialize>(body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::Message {
            body: serde_json::to_value(body)?,
        })
    }

    /// Encodes the envelope as one line, including the trailing newline
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decodes one line; malformed lines yield `None`
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str(line) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::debug!("Dropping malformed line ({}): {}", e, line);
                None
            }
        }
    }
}
