//! Queue persistence.
//!
//! The queue is a single ordered JSON array stored under one key of a
//! host-supplied key-value capability ([`KeyValueStore`]). [`QueueStore`]
//! owns every mutation of that array and serializes read-modify-write cycles
//! so that a timer tick and a user action can never lose each other's
//! updates.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use fs2::FileExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::types::QueueItem;

/// Default key under which the queue is persisted.
pub const DEFAULT_QUEUE_KEY: &str = "prompt_queue.items";

/// Default state file name.
const DEFAULT_STATE_FILE: &str = ".prompt-queue-state.json";

/// A get/set key-value capability supplied by the host.
///
/// Values are JSON documents encoded as strings. A missing key reads as
/// `None`. A completed `set` must be durable for the backing medium.
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Replaces the value stored under `key`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replaces the value under `key` with `apply(current)`.
    ///
    /// Backends that can be shared between processes hold their write lock
    /// from the read through the write. The provided implementation is a
    /// plain `get` followed by `set`. When `apply` fails nothing is written.
    ///
    /// ## Errors
    ///
    /// Returns the backend error, or the error produced by `apply`.
    fn update<F>(&self, key: &str, apply: F) -> impl Future<Output = Result<(), StoreError>> + Send
    where
        F: FnOnce(Option<String>) -> Result<String, StoreError> + Send + 'static,
    {
        async move {
            let current = self.get(key).await?;
            let next = apply(current)?;
            self.set(key, next).await
        }
    }
}

impl<T: KeyValueStore> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).set(key, value)
    }

    fn update<F>(&self, key: &str, apply: F) -> impl Future<Output = Result<(), StoreError>> + Send
    where
        F: FnOnce(Option<String>) -> Result<String, StoreError> + Send + 'static,
    {
        (**self).update(key, apply)
    }
}

/// In-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    values: StdMutex<HashMap<String, String>>,
}

impl MemoryKv {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still structurally valid.
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn update<F>(&self, key: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(Option<String>) -> Result<String, StoreError> + Send + 'static,
    {
        let mut values = self.lock();
        let next = apply(values.get(key).cloned())?;
        values.insert(key.to_string(), next);
        Ok(())
    }
}

/// JSON file-backed key-value store.
///
/// The file holds one JSON object mapping keys to JSON values. Reads take a
/// shared `fs2` lock on the file. Writes take an exclusive lock on a sibling
/// `.lock` file, held from reading the current map until the replacement has
/// been renamed into place, so separate processes sharing the file never
/// lose each other's updates. Blocking I/O runs on the tokio blocking pool.
///
/// ## Examples
///
/// ```no_run
/// use prompt_queue_lib::{JsonFileKv, QueueStore};
///
/// # async fn example() {
/// let store = QueueStore::new(JsonFileKv::new("/tmp/prompt-queue.json".into()));
/// let items = store.get_all().await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileKv {
    path: PathBuf,
}

impl JsonFileKv {
    /// Creates a store backed by the file at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Creates a store at the default path (`~/.prompt-queue-state.json`).
    ///
    /// Falls back to the current directory if the home directory cannot be
    /// determined.
    pub fn default_path() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(DEFAULT_STATE_FILE))
    }

    /// Returns the path to the state file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn read_map(path: &Path) -> Result<BTreeMap<String, Value>, StoreError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()
            .map_err(|_| StoreError::Lock(path.to_path_buf()))?;

        let mut contents = String::new();
        let read = file.read_to_string(&mut contents);
        file.unlock()
            .map_err(|_| StoreError::Lock(path.to_path_buf()))?;
        read?;

        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn get_blocking(&self, key: &str) -> Result<Option<String>, StoreError> {
        let map = Self::read_map(&self.path)?;
        map.get(key)
            .map(serde_json::to_string)
            .transpose()
            .map_err(StoreError::from)
    }

    fn update_blocking<F>(&self, key: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(Option<String>) -> Result<String, StoreError>,
    {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = self.lock_path();
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive()
            .map_err(|_| StoreError::Lock(lock_path.clone()))?;

        let result = (|| -> Result<(), StoreError> {
            let mut map = Self::read_map(&self.path)?;
            let current = map.get(key).map(serde_json::to_string).transpose()?;
            let next = apply(current)?;
            map.insert(key.to_string(), serde_json::from_str(&next)?);

            let tmp_path = self.path.with_extension("json.tmp");
            let mut tmp = File::create(&tmp_path)?;
            serde_json::to_writer_pretty(&mut tmp, &map)?;
            tmp.write_all(b"\n")?;
            tmp.sync_all()?;
            std::fs::rename(&tmp_path, &self.path)?;
            Ok(())
        })();

        lock.unlock().map_err(|_| StoreError::Lock(lock_path))?;
        result
    }
}

impl KeyValueStore for JsonFileKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let this = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.get_blocking(&key))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.update(key, move |_| Ok(value)).await
    }

    async fn update<F>(&self, key: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(Option<String>) -> Result<String, StoreError> + Send + 'static,
    {
        let this = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || this.update_blocking(&key, apply))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Ordered collection of [`QueueItem`]s persisted through a [`KeyValueStore`].
///
/// Every mutating operation holds an async mutex for this instance and runs
/// its read-modify-write cycle through [`KeyValueStore::update`], so the
/// backend's own lock covers other instances and processes. Mutations only
/// return once the backend has stored the result. Items are kept in insertion order. The store performs no
/// validation of item contents.
pub struct QueueStore<B> {
    backend: B,
    key: String,
    write_lock: Mutex<()>,
}

impl<B: KeyValueStore> QueueStore<B> {
    /// Creates a store using [`DEFAULT_QUEUE_KEY`].
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            key: DEFAULT_QUEUE_KEY.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    /// Uses a different persistence key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// The persistence key in use.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// All items in insertion order.
    ///
    /// A missing or empty persisted value reads as an empty queue.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails or the value is not a JSON array
    /// of items.
    pub async fn get_all(&self) -> Result<Vec<QueueItem>, StoreError> {
        decode_items(self.backend.get(&self.key).await?.as_deref())
    }

    /// Items with `processed == false`, in insertion order.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get_pending(&self) -> Result<Vec<QueueItem>, StoreError> {
        let mut items = self.get_all().await?;
        items.retain(QueueItem::is_pending);
        Ok(items)
    }

    /// Looks up a single item.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>, StoreError> {
        Ok(self.get_all().await?.into_iter().find(|item| item.id == id))
    }

    /// Number of stored items, processed ones included.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.get_all().await?.len())
    }

    /// Returns true if the store holds no items.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// Appends an item.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn add(&self, item: QueueItem) -> Result<(), StoreError> {
        let id = item.id.clone();
        self.update(move |items| items.push(item)).await?;
        debug!(id, "queue item added");
        Ok(())
    }

    /// Flags an item as processed. Missing ids are ignored.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn mark_processed(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.update(move |items| {
            if let Some(item) = items.iter_mut().find(|item| item.id == id) {
                item.processed = true;
            }
        })
        .await
    }

    /// Deletes an item. Missing ids are ignored.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.update(move |items| items.retain(|item| item.id != id))
            .await
    }

    /// Deletes every processed item, keeping pending ones in order.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn purge_processed(&self) -> Result<(), StoreError> {
        self.update(|items| items.retain(QueueItem::is_pending)).await
    }

    /// Deletes every item.
    ///
    /// ## Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.update(Vec::clear).await
    }

    async fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<QueueItem>) + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        self.backend
            .update(&self.key, move |current| {
                let mut items = decode_items(current.as_deref())?;
                mutate(&mut items);
                Ok(serde_json::to_string(&items)?)
            })
            .await
    }
}

/// Decodes a persisted queue. Missing, empty and `null` values are an empty
/// queue.
fn decode_items(raw: Option<&str>) -> Result<Vec<QueueItem>, StoreError> {
    match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() && raw != "null" => Ok(serde_json::from_str(raw)?),
        _ => Ok(Vec::new()),
    }
}
