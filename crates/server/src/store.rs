//! Credential store and object store.
//!
//! Both are traits so a deployment can back them with a database or an
//! S3-compatible bucket. Uploads go to a directory by default; the capped
//! in-memory bucket is for development and tests.

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value for unique field `{0}`")]
    Conflict(&'static str),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid object key")]
    InvalidKey,

    #[error("object of {size} bytes exceeds the store limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
}

/// Stored user. The credential hash never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub display_name: String,
    pub email: String,
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub display_name: String,
    pub email: String,
    pub credential_hash: String,
}

/// User fields safe to return to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for PublicUser {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.display_name.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Insert a user; fails with `Conflict("email")` if the email exists.
    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError>;
}

/// Users table held in memory, unique on email.
#[derive(Debug)]
pub struct InMemoryUserStore {
    next_id: AtomicI64,
    by_email: DashMap<String, UserRecord>,
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            by_email: DashMap::new(),
        }
    }
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.by_email.get(email).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.by_email.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict("email")),
            Entry::Vacant(vacant) => {
                let now = Utc::now();
                let record = UserRecord {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst),
                    display_name: user.display_name,
                    email: user.email,
                    credential_hash: user.credential_hash,
                    created_at: now,
                    updated_at: now,
                };
                vacant.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users: Vec<UserRecord> = self
            .by_email
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub body: Bytes,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key` and return its public URL.
    async fn put(&self, key: &str, body: Bytes) -> Result<String, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;
}

/// Object keys are flat names: ASCII alphanumerics, `-`, `_` and `.`, not
/// starting with a dot.
pub fn is_valid_object_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn public_url(base: &str, key: &str) -> String {
    format!("{base}/{key}")
}

#[derive(Debug, Default)]
struct MemoryBucket {
    objects: HashMap<String, Bytes>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
    total_bytes: usize,
}

impl MemoryBucket {
    fn remove(&mut self, key: &str) {
        if let Some(body) = self.objects.remove(key) {
            self.total_bytes -= body.len();
            self.order.retain(|k| k != key);
        }
    }
}

/// Bucket held in memory, bounded by `max_bytes`; the oldest objects are
/// evicted to make room. URLs are `{public_base_url}/{key}`.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    public_base_url: String,
    max_bytes: usize,
    bucket: RwLock<MemoryBucket>,
}

impl InMemoryObjectStore {
    pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self::with_max_bytes(public_base_url, Self::DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(public_base_url: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_bytes,
            bucket: RwLock::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.bucket.read().map(|b| b.objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.bucket.read().map(|b| b.total_bytes).unwrap_or(0)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<String, StoreError> {
        if !is_valid_object_key(key) {
            return Err(StoreError::InvalidKey);
        }
        if body.len() > self.max_bytes {
            return Err(StoreError::TooLarge {
                size: body.len(),
                limit: self.max_bytes,
            });
        }

        let mut bucket = self
            .bucket
            .write()
            .map_err(|_| StoreError::Unavailable("object map lock poisoned".into()))?;
        bucket.remove(key);
        while bucket.total_bytes + body.len() > self.max_bytes {
            let Some(oldest) = bucket.order.pop_front() else {
                break;
            };
            if let Some(evicted) = bucket.objects.remove(&oldest) {
                bucket.total_bytes -= evicted.len();
                tracing::debug!(key = %oldest, "evicted object to stay under capacity");
            }
        }
        bucket.total_bytes += body.len();
        bucket.order.push_back(key.to_string());
        bucket.objects.insert(key.to_string(), body);

        Ok(public_url(&self.public_base_url, key))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let bucket = self
            .bucket
            .read()
            .map_err(|_| StoreError::Unavailable("object map lock poisoned".into()))?;
        Ok(bucket.objects.get(key).map(|body| StoredObject {
            key: key.to_string(),
            body: body.clone(),
        }))
    }
}

/// Bucket backed by one directory; objects survive restarts.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    public_base_url: String,
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(public_base_url: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<String, StoreError> {
        if !is_valid_object_key(key) {
            return Err(StoreError::InvalidKey);
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", self.root.display())))?;

        // Staged write; readers never see a partial object.
        let staging = self.root.join(format!(".{key}.partial"));
        let target = self.root.join(key);
        tokio::fs::write(&staging, &body)
            .await
            .map_err(|e| StoreError::Unavailable(format!("write {key}: {e}")))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| StoreError::Unavailable(format!("rename {key}: {e}")))?;

        Ok(public_url(&self.public_base_url, key))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        if !is_valid_object_key(key) {
            return Ok(None);
        }
        match tokio::fs::read(self.root.join(key)).await {
            Ok(body) => Ok(Some(StoredObject {
                key: key.to_string(),
                body: Bytes::from(body),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("read {key}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            display_name: "ada".into(),
            email: email.into(),
            credential_hash: "$argon2id$stub".into(),
        }
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_enforces_unique_email() {
        let store = InMemoryUserStore::new();
        let first = store.insert(new_user("a@example.com")).await.unwrap();
        let second = store.insert(new_user("b@example.com")).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        let dup = store.insert(new_user("a@example.com")).await;
        assert_eq!(dup, Err(StoreError::Conflict("email")));

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].email, "a@example.com");
    }

    #[tokio::test]
    async fn find_by_email_misses_unknown() {
        let store = InMemoryUserStore::new();
        store.insert(new_user("a@example.com")).await.unwrap();
        assert!(store.find_by_email("a@example.com").await.unwrap().is_some());
        assert!(store.find_by_email("z@example.com").await.unwrap().is_none());
    }

    #[test]
    fn public_user_omits_hash() {
        let now = Utc::now();
        let record = UserRecord {
            id: 3,
            display_name: "ada".into(),
            email: "a@example.com".into(),
            credential_hash: "secret-hash".into(),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(PublicUser::from(&record)).unwrap();
        assert_eq!(json["id"], "3");
        assert_eq!(json["username"], "ada");
        assert!(json.get("createdAt").is_some());
        assert!(!json.to_string().contains("secret-hash"));
    }

    #[tokio::test]
    async fn objects_round_trip_with_public_url() {
        let store = InMemoryObjectStore::new("https://cdn.example.com/product/");
        let url = store
            .put("abc.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/product/abc.png");

        let object = store.get("abc.png").await.unwrap().unwrap();
        assert_eq!(object.body, Bytes::from_static(b"png"));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_bucket_evicts_oldest_to_stay_under_cap() {
        let store = InMemoryObjectStore::with_max_bytes("/objects", 10);
        store.put("a", Bytes::from_static(b"aaaa")).await.unwrap();
        store.put("b", Bytes::from_static(b"bbbb")).await.unwrap();
        store.put("c", Bytes::from_static(b"cccc")).await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
        assert!(store.get("c").await.unwrap().is_some());
        assert_eq!(store.total_bytes(), 8);

        // Overwriting a key does not count it twice.
        store.put("c", Bytes::from_static(b"cc")).await.unwrap();
        assert_eq!(store.total_bytes(), 6);
        assert_eq!(store.len(), 2);

        let too_big = store.put("d", Bytes::from(vec![0u8; 11])).await;
        assert_eq!(too_big, Err(StoreError::TooLarge { size: 11, limit: 10 }));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn object_keys_are_flat_names() {
        assert!(is_valid_object_key("4f1c-9a.png"));
        assert!(is_valid_object_key("plain_name"));
        for bad in ["", ".hidden", "../etc/passwd", "a/b.png", "a\\b", "x y.png"] {
            assert!(!is_valid_object_key(bad), "{bad}");
        }
    }

    #[tokio::test]
    async fn filesystem_bucket_persists_objects() {
        let root = std::env::temp_dir().join(format!("gatekeep-store-{}", uuid::Uuid::new_v4()));
        let store = FilesystemObjectStore::new("/upload/mock", &root);

        let url = store.put("label.png", Bytes::from_static(b"\x89PNG")).await.unwrap();
        assert_eq!(url, "/upload/mock/label.png");

        // A second handle over the same directory sees the object.
        let reopened = FilesystemObjectStore::new("/upload/mock", &root);
        let object = reopened.get("label.png").await.unwrap().unwrap();
        assert_eq!(&object.body[..], b"\x89PNG");
        assert!(reopened.get("missing.png").await.unwrap().is_none());
        assert!(reopened.get("../label.png").await.unwrap().is_none());
        assert_eq!(
            store.put("../escape.png", Bytes::from_static(b"x")).await,
            Err(StoreError::InvalidKey)
        );

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
