use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chorus_config::Cache;
use chorus_kernel::CacheKey;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite audio store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("fs audio store error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audio store misconfigured: {0}")]
    Misconfigured(String),
}

/// Audio store supplied by the embedding application, e.g. an object store
/// client. `put` must keep the first value written under a key.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &CacheKey, audio: &str) -> Result<(), StoreError>;
}

/// Persistent key-value store for base64 audio. Entries are created once and
/// never removed here.
pub enum AudioStore {
    Memory(MemoryAudioStore),
    Sqlite(SqliteAudioStore),
    Fs(FsAudioStore),
    External(Arc<dyn AudioBackend>),
}

#[derive(Default)]
pub struct MemoryAudioStore {
    entries: RwLock<HashMap<String, String>>,
}

pub struct SqliteAudioStore {
    conn: Mutex<Connection>,
}

pub struct FsAudioStore {
    dir: PathBuf,
}

impl AudioStore {
    pub async fn from_config(cfg: &Cache) -> Result<Self, StoreError> {
        match cfg.store.kind.as_str() {
            "memory" => Ok(AudioStore::Memory(MemoryAudioStore::default())),
            "sqlite" => {
                let path = cfg.store.sqlite_path.as_deref().ok_or_else(|| {
                    StoreError::Misconfigured("cache.store.sqlite_path is required".to_string())
                })?;
                Ok(AudioStore::Sqlite(SqliteAudioStore::open(path)?))
            }
            "fs" => {
                let dir = cfg.store.dir.as_deref().ok_or_else(|| {
                    StoreError::Misconfigured("cache.store.dir is required".to_string())
                })?;
                Ok(AudioStore::Fs(FsAudioStore::open(dir).await?))
            }
            other => Err(StoreError::Misconfigured(format!(
                "unknown cache.store.type {other}"
            ))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AudioStore::Memory(_) => "memory",
            AudioStore::Sqlite(_) => "sqlite",
            AudioStore::Fs(_) => "fs",
            AudioStore::External(_) => "external",
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Result<Option<String>, StoreError> {
        match self {
            AudioStore::Memory(store) => Ok(store.entries.read().await.get(key.as_str()).cloned()),
            AudioStore::Sqlite(store) => store.get(key).await,
            AudioStore::Fs(store) => store.get(key).await,
            AudioStore::External(backend) => backend.get(key).await,
        }
    }

    pub async fn put(&self, key: &CacheKey, audio: &str) -> Result<(), StoreError> {
        match self {
            AudioStore::Memory(store) => {
                store
                    .entries
                    .write()
                    .await
                    .entry(key.as_str().to_string())
                    .or_insert_with(|| audio.to_string());
                Ok(())
            }
            AudioStore::Sqlite(store) => store.put(key, audio).await,
            AudioStore::Fs(store) => store.put(key, audio).await,
            AudioStore::External(backend) => backend.put(key, audio).await,
        }
    }
}

impl SqliteAudioStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS audio_cache (
                cache_key TEXT PRIMARY KEY,
                audio TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().await;
        let audio = conn
            .query_row(
                "SELECT audio FROM audio_cache WHERE cache_key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(audio)
    }

    async fn put(&self, key: &CacheKey, audio: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR IGNORE INTO audio_cache(cache_key, audio, created_at) VALUES (?1, ?2, ?3)",
            params![key.as_str(), audio, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl FsAudioStore {
    pub async fn open(dir: &str) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        Ok(Self {
            dir: PathBuf::from(dir),
        })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.b64"))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.entry_path(key)).await {
            Ok(audio) => Ok(Some(audio)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &CacheKey, audio: &str) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        // Write-then-rename so readers never see a partial entry.
        let staging = self
            .dir
            .join(format!("{key}.{}.tmp", uuid::Uuid::new_v4().as_simple()));
        tokio::fs::write(&staging, audio).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}

/// Content-addressed view over the audio store.
///
/// Store failures never surface: a failed lookup is a miss, a failed write is
/// logged. When the cache is disabled every lookup misses and nothing is
/// written.
pub struct SpeechCache {
    store: AudioStore,
    enabled: bool,
}

impl SpeechCache {
    pub fn new(store: AudioStore, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub async fn from_config(cfg: &Cache) -> Result<Self, StoreError> {
        Ok(Self::new(AudioStore::from_config(cfg).await?, cfg.enabled))
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub async fn lookup(&self, key: &CacheKey) -> Option<String> {
        if !self.enabled {
            return None;
        }
        match self.store.get(key).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(
                    event_name = "speech_cache.lookup_failed",
                    cache_key = %key,
                    store = self.store.kind(),
                    error = %err,
                    "audio store unavailable, treating lookup as a miss"
                );
                None
            }
        }
    }

    pub async fn store(&self, key: &CacheKey, audio: &str) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.store.put(key, audio).await {
            tracing::warn!(
                event_name = "speech_cache.store_failed",
                cache_key = %key,
                store = self.store.kind(),
                error = %err,
                "audio store write failed"
            );
        }
    }
}
