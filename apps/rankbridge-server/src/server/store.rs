#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::{collections::BTreeMap, io::ErrorKind, marker::PhantomData, path::PathBuf, time::Duration};

use rankbridge_core::{ChatIdentity, PlatformUsername, VerificationCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
#[cfg(test)]
use tokio::sync::RwLock;

use super::core::now_unix_ms;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[cfg(test)]
    #[error("store rejected the write")]
    Rejected,
}

/// An outstanding ownership challenge for one chat identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingVerification {
    pub code: VerificationCode,
    pub claimed_username: PlatformUsername,
    pub issued_at_unix_ms: i64,
}

impl PendingVerification {
    pub(crate) fn expires_at_unix_ms(&self, ttl: Duration) -> i64 {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.issued_at_unix_ms.saturating_add(ttl_ms)
    }

    pub(crate) fn is_expired(&self, now_unix_ms: i64, ttl: Duration) -> bool {
        now_unix_ms >= self.expires_at_unix_ms(ttl)
    }
}

/// Durable map from chat identity to a value. Reads never fail; a damaged backing document
/// reads as empty.
pub(crate) trait KeyValueStore<V> {
    async fn get(&self, key: &ChatIdentity) -> Option<V>;

    async fn put(&self, key: &ChatIdentity, value: V) -> Result<(), StoreError>;

    async fn remove(&self, key: &ChatIdentity) -> Result<(), StoreError>;

    /// Drops every entry `keep` rejects and returns how many were dropped.
    async fn retain(&self, keep: impl Fn(&V) -> bool + Send) -> Result<usize, StoreError>;
}

type Document<V> = BTreeMap<String, V>;

/// One pretty-printed JSON object per store, rewritten in full through a temp file.
pub(crate) struct JsonFileStore<V> {
    path: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V> JsonFileStore<V>
where
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            _value: PhantomData,
        }
    }

    async fn load(&self) -> Result<Document<V>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::new());
        }
        let entries: Document<serde_json::Value> = match serde_json::from_slice(&raw) {
            Ok(entries) => entries,
            Err(parse_error) => {
                self.back_up_corrupt_file(&parse_error).await;
                return Ok(Document::new());
            }
        };
        let mut document = Document::new();
        for (key, value) in entries {
            match serde_json::from_value(value) {
                Ok(value) => {
                    document.insert(key, value);
                }
                Err(e) => tracing::warn!(
                    event = "store.entry_skipped",
                    path = %self.path.display(),
                    key = %key,
                    error = %e,
                ),
            }
        }
        Ok(document)
    }

    async fn back_up_corrupt_file(&self, parse_error: &serde_json::Error) {
        let mut backup = self.path.clone().into_os_string();
        backup.push(format!(".backup-{}", now_unix_ms()));
        let backup = PathBuf::from(backup);
        match tokio::fs::rename(&self.path, &backup).await {
            Ok(()) => tracing::warn!(
                event = "store.corrupt",
                outcome = "backed_up",
                path = %self.path.display(),
                backup = %backup.display(),
                error = %parse_error,
            ),
            Err(e) => tracing::warn!(
                event = "store.corrupt",
                outcome = "backup_failed",
                path = %self.path.display(),
                error = %e,
            ),
        }
    }

    async fn persist(&self, document: &Document<V>) -> Result<(), StoreError> {
        let encoded = serde_json::to_string_pretty(document)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut temp = self.path.clone().into_os_string();
        temp.push(format!(".{}.tmp", ulid::Ulid::new()));
        let temp = PathBuf::from(temp);
        tokio::fs::write(&temp, encoded).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }
}

impl<V> KeyValueStore<V> for JsonFileStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    async fn get(&self, key: &ChatIdentity) -> Option<V> {
        match self.load().await {
            Ok(document) => document.get(key.as_str()).cloned(),
            Err(e) => {
                tracing::warn!(
                    event = "store.read",
                    outcome = "failed",
                    path = %self.path.display(),
                    error = %e,
                );
                None
            }
        }
    }

    async fn put(&self, key: &ChatIdentity, value: V) -> Result<(), StoreError> {
        let mut document = self.load().await?;
        document.insert(key.as_str().to_owned(), value);
        self.persist(&document).await
    }

    async fn remove(&self, key: &ChatIdentity) -> Result<(), StoreError> {
        let mut document = self.load().await?;
        if document.remove(key.as_str()).is_none() {
            return Ok(());
        }
        self.persist(&document).await
    }

    async fn retain(&self, keep: impl Fn(&V) -> bool + Send) -> Result<usize, StoreError> {
        let mut document = self.load().await?;
        let before = document.len();
        document.retain(|_, value| keep(value));
        let dropped = before - document.len();
        if dropped > 0 {
            self.persist(&document).await?;
        }
        Ok(dropped)
    }
}

/// Process-local store. Writes can be made to fail on demand.
#[cfg(test)]
pub(crate) struct InMemoryStore<V> {
    entries: RwLock<Document<V>>,
    reject_writes: AtomicBool,
}

#[cfg(test)]
impl<V> Default for InMemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Document::new()),
            reject_writes: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
impl<V> InMemoryStore<V> {
    pub(crate) fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected);
        }
        Ok(())
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
impl<V> KeyValueStore<V> for InMemoryStore<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &ChatIdentity) -> Option<V> {
        self.entries.read().await.get(key.as_str()).cloned()
    }

    async fn put(&self, key: &ChatIdentity, value: V) -> Result<(), StoreError> {
        self.check_writable()?;
        self.entries
            .write()
            .await
            .insert(key.as_str().to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &ChatIdentity) -> Result<(), StoreError> {
        self.check_writable()?;
        self.entries.write().await.remove(key.as_str());
        Ok(())
    }

    async fn retain(&self, keep: impl Fn(&V) -> bool + Send) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, value| keep(value));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(raw: &str) -> ChatIdentity {
        ChatIdentity::try_from(raw.to_owned()).expect("identity")
    }

    fn username(raw: &str) -> PlatformUsername {
        PlatformUsername::try_from(raw.to_owned()).expect("username")
    }

    fn temp_store_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("rankbridge-store-{}", ulid::Ulid::new()))
            .join(name)
    }

    #[tokio::test]
    async fn json_store_round_trips_and_sorts_keys() {
        let path = temp_store_path("account_links.json");
        let store = JsonFileStore::<PlatformUsername>::new(path.clone());

        store
            .put(&identity("200"), username("Bob"))
            .await
            .expect("put");
        store
            .put(&identity("100"), username("Alice"))
            .await
            .expect("put");

        assert_eq!(store.get(&identity("100")).await, Some(username("Alice")));
        let raw = tokio::fs::read_to_string(&path).await.expect("file written");
        let alice_at = raw.find("\"100\"").expect("alice key");
        let bob_at = raw.find("\"200\"").expect("bob key");
        assert!(alice_at < bob_at);
        assert!(raw.contains('\n'));

        store.remove(&identity("100")).await.expect("remove");
        let reopened = JsonFileStore::<PlatformUsername>::new(path);
        assert_eq!(reopened.get(&identity("100")).await, None);
        assert_eq!(reopened.get(&identity("200")).await, Some(username("Bob")));
    }

    #[tokio::test]
    async fn corrupt_document_is_backed_up_and_reads_as_empty() {
        let path = temp_store_path("pending_verifications.json");
        let dir = path.parent().expect("parent").to_path_buf();
        tokio::fs::create_dir_all(&dir).await.expect("dir");
        tokio::fs::write(&path, "{ not json").await.expect("seed");

        let store = JsonFileStore::<PendingVerification>::new(path.clone());
        assert_eq!(store.get(&identity("1")).await, None);

        let mut entries = tokio::fs::read_dir(&dir).await.expect("read dir");
        let mut backups = 0;
        while let Some(entry) = entries.next_entry().await.expect("entry") {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with("pending_verifications.json.backup-")
            {
                backups += 1;
            }
        }
        assert_eq!(backups, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn non_utf8_document_is_backed_up_and_writable_again() {
        let path = temp_store_path("account_links.json");
        let dir = path.parent().expect("parent").to_path_buf();
        tokio::fs::create_dir_all(&dir).await.expect("dir");
        tokio::fs::write(&path, [0xff, 0xfe, b'{', b'}'])
            .await
            .expect("seed");

        let store = JsonFileStore::<PlatformUsername>::new(path.clone());
        assert_eq!(store.get(&identity("1")).await, None);
        store
            .put(&identity("1"), username("Alice"))
            .await
            .expect("put after reset");
        assert_eq!(store.get(&identity("1")).await, Some(username("Alice")));

        let mut entries = tokio::fs::read_dir(&dir).await.expect("read dir");
        let mut backups = 0;
        while let Some(entry) = entries.next_entry().await.expect("entry") {
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with("account_links.json.backup-")
            {
                backups += 1;
            }
        }
        assert_eq!(backups, 1);
    }

    #[tokio::test]
    async fn invalid_entry_is_skipped_without_dropping_the_rest() {
        let path = temp_store_path("account_links.json");
        let dir = path.parent().expect("parent").to_path_buf();
        tokio::fs::create_dir_all(&dir).await.expect("dir");
        tokio::fs::write(&path, r#"{"1": "Alice", "2": "", "3": 42, "4": "Bob"}"#)
            .await
            .expect("seed");

        let store = JsonFileStore::<PlatformUsername>::new(path.clone());
        assert_eq!(store.get(&identity("1")).await, Some(username("Alice")));
        assert_eq!(store.get(&identity("2")).await, None);
        assert_eq!(store.get(&identity("3")).await, None);
        assert_eq!(store.get(&identity("4")).await, Some(username("Bob")));

        store
            .put(&identity("5"), username("Carol"))
            .await
            .expect("put");
        assert_eq!(store.get(&identity("4")).await, Some(username("Bob")));
        let mut entries = tokio::fs::read_dir(&dir).await.expect("read dir");
        while let Some(entry) = entries.next_entry().await.expect("entry") {
            assert!(!entry.file_name().to_string_lossy().contains(".backup-"));
        }
    }

    #[tokio::test]
    async fn whitespace_document_reads_as_empty_without_backup() {
        let path = temp_store_path("account_links.json");
        tokio::fs::create_dir_all(path.parent().expect("parent"))
            .await
            .expect("dir");
        tokio::fs::write(&path, "  \n").await.expect("seed");

        let store = JsonFileStore::<PlatformUsername>::new(path.clone());
        assert_eq!(store.get(&identity("1")).await, None);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn retain_reports_dropped_entries() {
        let store = InMemoryStore::<PendingVerification>::default();
        let code = VerificationCode::generate_with(|_| 0);
        for (key, issued) in [("1", 0), ("2", 1_000_000)] {
            store
                .put(
                    &identity(key),
                    PendingVerification {
                        code: code.clone(),
                        claimed_username: username("Alice"),
                        issued_at_unix_ms: issued,
                    },
                )
                .await
                .expect("put");
        }

        let ttl = Duration::from_secs(600);
        let dropped = store
            .retain(|record| !record.is_expired(700_000, ttl))
            .await
            .expect("retain");
        assert_eq!(dropped, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&identity("2")).await.is_some());
    }

    #[tokio::test]
    async fn rejected_writes_leave_memory_store_untouched() {
        let store = InMemoryStore::<PlatformUsername>::default();
        store.reject_writes(true);
        assert!(matches!(
            store.put(&identity("1"), username("Alice")).await,
            Err(StoreError::Rejected)
        ));
        assert_eq!(store.get(&identity("1")).await, None);
    }

    #[test]
    fn pending_expiry_is_inclusive_of_the_deadline() {
        let record = PendingVerification {
            code: VerificationCode::generate_with(|_| 1),
            claimed_username: username("Alice"),
            issued_at_unix_ms: 1_000,
        };
        let ttl = Duration::from_secs(600);
        assert_eq!(record.expires_at_unix_ms(ttl), 601_000);
        assert!(!record.is_expired(600_999, ttl));
        assert!(record.is_expired(601_000, ttl));
    }
}
