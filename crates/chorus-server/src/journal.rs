use chorus_contracts::OutcomeKind;
use chorus_kernel::jcs_sha256_hex;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal record could not be hashed: {0}")]
    Hash(String),
    #[error("line {line}: {message}")]
    Broken { line: usize, message: String },
}

/// One line of the conversation journal, written after the caller has been
/// answered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalRecord {
    pub record_id: String,
    pub request_id: String,
    pub subject: String,
    pub ts: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OutcomeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub cache_hit: bool,
    pub resolve_ms: u64,
    pub speech_ms: u64,
    pub total_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

impl JournalRecord {
    pub fn new(request_id: &str, subject: &str) -> Self {
        Self {
            record_id: format!("conv_{}", uuid::Uuid::new_v4().as_simple()),
            request_id: request_id.to_string(),
            subject: subject.to_string(),
            ts: Utc::now().to_rfc3339(),
            result: "completed".to_string(),
            kind: None,
            error_code: None,
            cache_hit: false,
            resolve_ms: 0,
            speech_ms: 0,
            total_ms: 0,
            prev_hash: None,
            record_hash: String::new(),
        }
    }

    fn chain_hash(&self) -> Result<String, JournalError> {
        let mut seed = self.clone();
        seed.record_hash.clear();
        let value = serde_json::to_value(&seed).map_err(|e| JournalError::Hash(e.to_string()))?;
        jcs_sha256_hex(&value).map_err(JournalError::Hash)
    }
}

struct JournalTail {
    file: tokio::fs::File,
    last_hash: Option<String>,
}

/// Append-only JSONL journal. Each record carries the hash of its
/// predecessor.
pub struct ConversationJournal {
    tail: Mutex<JournalTail>,
}

impl ConversationJournal {
    pub async fn open(path: &str) -> Result<Self, JournalError> {
        let last_hash = match tokio::fs::read_to_string(path).await {
            Ok(text) => last_record_hash(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            tail: Mutex::new(JournalTail { file, last_hash }),
        })
    }

    pub async fn append(&self, mut record: JournalRecord) -> Result<JournalRecord, JournalError> {
        let mut tail = self.tail.lock().await;
        record.prev_hash = tail.last_hash.clone();
        record.record_hash = record.chain_hash()?;

        let mut line =
            serde_json::to_string(&record).map_err(|e| JournalError::Hash(e.to_string()))?;
        line.push('\n');
        tail.file.write_all(line.as_bytes()).await?;
        tail.file.flush().await?;
        tail.last_hash = Some(record.record_hash.clone());
        Ok(record)
    }
}

/// Hash of the last record. A torn or corrupt tail is an error: appending
/// after it would chain from an older record.
fn last_record_hash(text: &str) -> Result<Option<String>, JournalError> {
    let Some((idx, line)) = text
        .lines()
        .collect::<Vec<_>>()
        .into_iter()
        .enumerate()
        .rev()
        .find(|(_, line)| !line.trim().is_empty())
    else {
        return Ok(None);
    };
    let record: JournalRecord = serde_json::from_str(line).map_err(|e| JournalError::Broken {
        line: idx + 1,
        message: format!("unreadable last record: {e}"),
    })?;
    Ok(Some(record.record_hash))
}

/// Walks the journal and checks every link. Returns the number of records.
pub fn verify_journal_chain(path: &str) -> Result<usize, JournalError> {
    let text = std::fs::read_to_string(path)?;
    let mut prev: Option<String> = None;
    let mut count = 0usize;

    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let record: JournalRecord =
            serde_json::from_str(line).map_err(|e| JournalError::Broken {
                line: line_no,
                message: format!("parse failed: {e}"),
            })?;
        if record.prev_hash != prev {
            return Err(JournalError::Broken {
                line: line_no,
                message: format!(
                    "prev_hash mismatch: expected {:?}, got {:?}",
                    prev, record.prev_hash
                ),
            });
        }
        let expected = record.chain_hash()?;
        if record.record_hash != expected {
            return Err(JournalError::Broken {
                line: line_no,
                message: format!(
                    "record_hash mismatch: expected {expected}, got {}",
                    record.record_hash
                ),
            });
        }
        prev = Some(record.record_hash);
        count += 1;
    }

    Ok(count)
}
