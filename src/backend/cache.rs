//! Process-wide cache of loaded models, keyed by model path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use ort::session::Session;

use super::tfjs::TfjsModel;
use crate::error::Result;

/// Append-only map from canonical model path to a loaded model.
///
/// Entries are never evicted except through [`ModelCache::clear`].
pub struct ModelCache<T> {
    entries: Arc<Mutex<HashMap<PathBuf, Arc<T>>>>,
}

impl<T> Clone for ModelCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> ModelCache<T> {
    /// Return the cached model for `path`, loading it with `load` on a miss.
    ///
    /// The lock is held while loading so concurrent callers never load the
    /// same path twice.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error; nothing is cached in that case.
    pub fn get_or_load<F>(&self, path: &Path, load: F) -> Result<Arc<T>>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(hit) = entries.get(&key) {
            tracing::debug!("Model cache hit: {}", key.display());
            return Ok(Arc::clone(hit));
        }

        let model = Arc::new(load(path)?);
        entries.insert(key, Arc::clone(&model));
        Ok(model)
    }

    /// Number of cached models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached model.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Loaded backend sessions shared by every pipeline run in the process.
///
/// Cloning is cheap and shares the underlying maps. Tests build a private
/// instance with [`SessionCache::new`] instead of using [`SessionCache::global`].
///
/// Keys are model paths only. An ONNX session keeps the thread count it was
/// built with, so a later run asking for a different `concurrency` reuses
/// the first session as is. Call [`SessionCache::clear`] or use a private
/// cache to rebuild with new settings.
#[derive(Clone, Default)]
pub struct SessionCache {
    pub(crate) onnx: ModelCache<Mutex<Session>>,
    pub(crate) tfjs: ModelCache<TfjsModel>,
}

impl SessionCache {
    /// An empty cache, independent of the global one.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    #[must_use]
    pub fn global() -> Self {
        static GLOBAL: OnceLock<SessionCache> = OnceLock::new();
        GLOBAL.get_or_init(SessionCache::new).clone()
    }

    /// Total number of cached models across backends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.onnx.len() + self.tfjs.len()
    }

    /// Whether no model is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached session.
    pub fn clear(&self) {
        self.onnx.clear();
        self.tfjs.clear();
    }
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("onnx", &self.onnx.len())
            .field("tfjs", &self.tfjs.len())
            .finish()
    }
}
