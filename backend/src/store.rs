//! Persistence for the games list.
//!
//! The whole list is one JSON document under a single key of a [`KvBackend`].
//! [`GameStore`] never fails a request: reads fall back to an in-memory mirror
//! and writes report [`SaveOutcome::Degraded`] instead of erroring.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use games_core::{parse_list, GameRecord, StoredLayout};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A string-keyed store of opaque values. No merge semantics: `put` replaces.
#[async_trait]
pub trait KvBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryBackend {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Keeps every key in one pretty-printed JSON file.
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, serde_json::Value>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        let values = self.read_all().await?;
        Ok(values.get(key).map(|value| match value {
            serde_json::Value::String(raw) => raw.clone(),
            other => other.to_string(),
        }))
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.read_all().await?;
        // documents are stored inline so the file stays readable; strings stay raw
        let value = match serde_json::from_str::<serde_json::Value>(&value) {
            Ok(serde_json::Value::String(_)) | Err(_) => serde_json::Value::String(value),
            Ok(parsed) => parsed,
        };
        values.insert(key.to_string(), value);
        let json = serde_json::to_vec_pretty(&values)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// Redis connection opened on first use, so an unreachable server at boot
/// degrades reads instead of stopping the process.
pub struct RedisBackend {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisBackend {
    /// Only validates the URL. Every later call is bounded by `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: OnceCell::new(),
            timeout,
        })
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Unavailable(format!(
                "redis did not answer within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let conn = self
            .conn
            .get_or_try_init(|| self.bounded(ConnectionManager::new(self.client.clone())))
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = self.bounded(conn.get::<_, Option<String>>(key)).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(conn.set::<_, _, ()>(key, value)).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Connected(usize),
    Empty,
    Seeded(usize),
    /// Backend unreachable; the list came from the mirror.
    Degraded,
}

impl StoreStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StoreStatus::Degraded)
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStatus::Connected(count) => write!(f, "Connected ({count} items)"),
            StoreStatus::Empty => write!(f, "Connected (Empty)"),
            StoreStatus::Seeded(count) => write!(f, "Seeded ({count} items)"),
            StoreStatus::Degraded => write!(f, "Degraded (store unreachable, serving cached list)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Persisted,
    /// The change only lives in this instance's mirror.
    Degraded,
}

impl fmt::Display for SaveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveOutcome::Persisted => write!(f, "Saved"),
            SaveOutcome::Degraded => write!(f, "Degraded (changes kept in memory only)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub games: Vec<GameRecord>,
    pub status: StoreStatus,
    /// Shape of the stored document, handed back to [`GameStore::save`].
    pub layout: StoredLayout,
}

/// Owner of the persisted list.
#[derive(Clone)]
pub struct GameStore {
    backend: Arc<dyn KvBackend>,
    key: String,
    seed: Vec<GameRecord>,
    /// Best-effort copy of the last list seen. Never authoritative.
    mirror: Arc<RwLock<Option<Vec<GameRecord>>>>,
}

impl GameStore {
    pub fn new(backend: Arc<dyn KvBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            seed: Vec::new(),
            mirror: Arc::new(RwLock::new(None)),
        }
    }

    /// List to start from when the key has never been written.
    pub fn with_seed(mut self, seed: Vec<GameRecord>) -> Self {
        self.seed = seed;
        self
    }

    pub fn provider(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn load(&self) -> Snapshot {
        match self.backend.get(&self.key).await {
            Ok(Some(raw)) => {
                let parsed = parse_list(&raw);
                if parsed.malformed {
                    warn!(key = %self.key, "stored games document is not a JSON array; treating as empty");
                }
                if parsed.skipped > 0 {
                    warn!(key = %self.key, skipped = parsed.skipped, "kept undecodable game entries as stored");
                }
                let status = match parsed.games.len() {
                    0 => StoreStatus::Empty,
                    n => StoreStatus::Connected(n),
                };
                self.remember(&parsed.games).await;
                Snapshot {
                    games: parsed.games,
                    status,
                    layout: parsed.layout,
                }
            }
            Ok(None) if self.seed.is_empty() => {
                self.remember(&[]).await;
                Snapshot {
                    games: Vec::new(),
                    status: StoreStatus::Empty,
                    layout: StoredLayout::default(),
                }
            }
            Ok(None) => {
                match serde_json::to_string(&self.seed) {
                    Ok(raw) => {
                        if let Err(err) = self.backend.put(&self.key, raw).await {
                            warn!(key = %self.key, error = %err, "could not initialize games key");
                        }
                    }
                    Err(err) => warn!(error = %err, "could not encode seed games"),
                }
                self.remember(&self.seed).await;
                Snapshot {
                    games: self.seed.clone(),
                    status: StoreStatus::Seeded(self.seed.len()),
                    layout: StoredLayout::default(),
                }
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "games store unreachable; serving mirror");
                Snapshot {
                    games: self.mirror_snapshot().await.unwrap_or_default(),
                    status: StoreStatus::Degraded,
                    layout: StoredLayout::default(),
                }
            }
        }
    }

    /// Full-document replace. Never fails the caller.
    ///
    /// `layout` comes from the snapshot `games` was derived from; entries the
    /// change did not touch are written back exactly as they were read.
    pub async fn save(&self, layout: &StoredLayout, games: &[GameRecord]) -> SaveOutcome {
        self.remember(games).await;
        let raw = match layout.encode(games) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "could not encode games list");
                return SaveOutcome::Degraded;
            }
        };
        match self.backend.put(&self.key, raw).await {
            Ok(()) => {
                debug!(key = %self.key, count = games.len(), "games list saved");
                SaveOutcome::Persisted
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "games list not persisted");
                SaveOutcome::Degraded
            }
        }
    }

    /// Record a list in the mirror without touching the backend.
    pub async fn keep_in_memory(&self, games: &[GameRecord]) -> SaveOutcome {
        self.remember(games).await;
        SaveOutcome::Degraded
    }

    pub async fn mirror_snapshot(&self) -> Option<Vec<GameRecord>> {
        self.mirror.read().await.clone()
    }

    async fn remember(&self, games: &[GameRecord]) {
        *self.mirror.write().await = Some(games.to_vec());
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    /// In-memory backend that can be switched offline.
    #[derive(Default)]
    pub struct FlakyBackend {
        inner: MemoryBackend,
        offline: AtomicBool,
    }

    impl FlakyBackend {
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put(key, value).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FlakyBackend;
    use super::*;
    use games_core::seed_games;

    const KEY: &str = "games_data";

    fn game(id: i64, name: &str) -> GameRecord {
        GameRecord {
            id,
            name: name.into(),
            icon: format!("https://img.example/{id}.png"),
            steam_id: None,
        }
    }

    #[tokio::test]
    async fn missing_key_loads_empty_list() {
        let store = GameStore::new(Arc::new(MemoryBackend::default()), KEY);
        let snapshot = store.load().await;
        assert!(snapshot.games.is_empty());
        assert_eq!(snapshot.status, StoreStatus::Empty);
        assert_eq!(snapshot.status.to_string(), "Connected (Empty)");
    }

    #[tokio::test]
    async fn missing_key_seeds_and_initializes_backend() {
        let backend = Arc::new(MemoryBackend::default());
        let store = GameStore::new(backend.clone(), KEY).with_seed(seed_games());

        let snapshot = store.load().await;
        assert_eq!(snapshot.games, seed_games());
        assert_eq!(snapshot.status, StoreStatus::Seeded(2));

        let raw = backend.get(KEY).await.unwrap().unwrap();
        assert_eq!(parse_list(&raw).games, seed_games());
        assert_eq!(store.load().await.status, StoreStatus::Connected(2));
    }

    #[tokio::test]
    async fn save_is_full_replace() {
        let backend = Arc::new(MemoryBackend::default());
        let store = GameStore::new(backend.clone(), KEY);

        assert_eq!(store.save(&StoredLayout::default(), &[game(1, "A"), game(2, "B")]).await, SaveOutcome::Persisted);
        assert_eq!(store.save(&StoredLayout::default(), &[game(3, "C")]).await, SaveOutcome::Persisted);

        let snapshot = store.load().await;
        assert_eq!(snapshot.games, vec![game(3, "C")]);
        assert_eq!(snapshot.status.to_string(), "Connected (1 items)");
    }

    #[tokio::test]
    async fn malformed_document_reads_as_empty() {
        let backend = Arc::new(MemoryBackend::default());
        backend.put(KEY, r#"{"not":"a list"}"#.into()).await.unwrap();
        let store = GameStore::new(backend, KEY);
        let snapshot = store.load().await;
        assert!(snapshot.games.is_empty());
        assert_eq!(snapshot.status, StoreStatus::Empty);
    }

    #[tokio::test]
    async fn unreachable_backend_serves_mirror() {
        let backend = Arc::new(FlakyBackend::default());
        let store = GameStore::new(backend.clone(), KEY);

        backend.set_offline(true);
        let snapshot = store.load().await;
        assert!(snapshot.games.is_empty());
        assert!(snapshot.status.is_degraded());

        backend.set_offline(false);
        store.save(&StoredLayout::default(), &[game(1, "A")]).await;

        backend.set_offline(true);
        let snapshot = store.load().await;
        assert_eq!(snapshot.games, vec![game(1, "A")]);
        assert_eq!(snapshot.status, StoreStatus::Degraded);

        assert_eq!(store.save(&StoredLayout::default(), &[game(1, "A"), game(2, "B")]).await, SaveOutcome::Degraded);
        assert_eq!(store.load().await.games.len(), 2);
    }

    #[tokio::test]
    async fn rewrite_keeps_entries_it_cannot_decode() {
        let backend = Arc::new(MemoryBackend::default());
        let stored = r#"[{"id":1,"name":"Legacy","icon":null},{"name":"orphan"},{"id":2,"name":"A","icon":"u"}]"#;
        backend.put(KEY, stored.into()).await.unwrap();
        let store = GameStore::new(backend.clone(), KEY);

        let snapshot = store.load().await;
        assert_eq!(snapshot.status, StoreStatus::Connected(2));
        assert_eq!(snapshot.games[0].name, "Legacy");

        let mut games = snapshot.games.clone();
        games.retain(|g| g.id != 2);
        assert_eq!(store.save(&snapshot.layout, &games).await, SaveOutcome::Persisted);
        assert_eq!(
            backend.get(KEY).await.unwrap().unwrap(),
            r#"[{"id":1,"name":"Legacy","icon":null},{"name":"orphan"}]"#
        );
    }

    #[tokio::test]
    async fn unreachable_redis_degrades_instead_of_failing_startup() {
        let backend = RedisBackend::new("redis://127.0.0.1:1/", Duration::from_millis(300)).unwrap();
        assert!(backend.get(KEY).await.is_err());
        assert!(backend.put(KEY, "[]".into()).await.is_err());

        let store = GameStore::new(Arc::new(backend), KEY);
        let snapshot = store.load().await;
        assert_eq!(snapshot.status, StoreStatus::Degraded);
        assert_eq!(store.provider(), "redis");
    }

    #[test]
    fn redis_url_is_still_validated_up_front() {
        assert!(RedisBackend::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn file_backend_keeps_string_values_intact() {
        let path = std::env::temp_dir().join(format!("games_store_{}.json", uuid::Uuid::new_v4()));
        let backend = FileBackend::new(path.clone());

        backend.put("quoted", "\"abc\"".into()).await.unwrap();
        backend.put("plain", "not json".into()).await.unwrap();
        assert_eq!(backend.get("quoted").await.unwrap().as_deref(), Some("\"abc\""));
        assert_eq!(backend.get("plain").await.unwrap().as_deref(), Some("not json"));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn file_backend_round_trips_documents() {
        let path = std::env::temp_dir().join(format!("games_store_{}.json", uuid::Uuid::new_v4()));
        let backend = FileBackend::new(path.clone());
        assert_eq!(backend.get(KEY).await.unwrap(), None);

        let store = GameStore::new(Arc::new(backend), KEY);
        assert_eq!(store.save(&StoredLayout::default(), &[game(1, "A")]).await, SaveOutcome::Persisted);

        let reopened = GameStore::new(Arc::new(FileBackend::new(path.clone())), KEY);
        assert_eq!(reopened.load().await.games, vec![game(1, "A")]);

        let on_disk: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk[KEY][0]["name"], "A");
        let _ = tokio::fs::remove_file(&path).await;
    }
}
