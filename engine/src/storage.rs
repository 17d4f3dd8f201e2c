//! Durable store adapter.
//!
//! Every component reads and writes persisted state through [`DurableStore`].
//! The adapter never fails: when the persistent backend errors it switches to
//! an in-process map for the rest of the session and logs once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Failure of a persistent backend. Never escapes [`DurableStore`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A persistent string key-value store.
pub trait Backend: Send {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError>;
    fn remove(&mut self, key: &str) -> Result<(), BackendError>;
}

/// Map-backed backend. Clones share the same map, so a clone kept aside can
/// observe (or outlive) the store it was handed to.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raw value of a key, bypassing any adapter.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    /// Write a raw value, bypassing any adapter.
    pub fn put_raw(&self, key: &str, value: &str) {
        self.entries().insert(key.to_string(), value.to_string());
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), BackendError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), BackendError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// A backend wrapped with a transparent in-memory fallback.
pub struct DurableStore {
    /// `None` once degraded
    backend: Option<Box<dyn Backend>>,
    /// Mirror of every value seen; the only store after degrading
    memory: HashMap<String, String>,
}

impl DurableStore {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend: Some(backend),
            memory: HashMap::new(),
        }
    }

    /// A store with no persistence at all.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        if let Some(backend) = &self.backend {
            match backend.get(key) {
                Ok(Some(value)) => {
                    self.memory.insert(key.to_string(), value.clone());
                    return Some(value);
                }
                Ok(None) => {
                    self.memory.remove(key);
                    return None;
                }
                Err(err) => self.degrade(key, err),
            }
        }
        self.memory.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(backend) = &mut self.backend {
            if let Err(err) = backend.set(key, value) {
                self.degrade(key, err);
            }
        }
        self.memory.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(backend) = &mut self.backend {
            if let Err(err) = backend.remove(key) {
                self.degrade(key, err);
            }
        }
        self.memory.remove(key);
    }

    /// Whether the store has fallen back to memory.
    pub fn is_degraded(&self) -> bool {
        self.backend.is_none()
    }

    fn degrade(&mut self, key: &str, err: BackendError) {
        if self.backend.take().is_some() {
            tracing::warn!(
                key,
                error = %err,
                "persistent storage failed, keeping state in memory for this session"
            );
        }
    }
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("degraded", &self.is_degraded())
            .field("keys", &self.memory.len())
            .finish()
    }
}
