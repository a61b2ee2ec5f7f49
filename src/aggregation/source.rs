//! Source descriptors and the registry that publishes them.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::persistence::{KeyValueStore, MemoryStore, SOURCES_KEY};

use super::error::RegistryError;

/// A configured content source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable identifier, used in item ids.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Page or feed the source is crawled from.
    pub endpoint: String,
    /// Whether the pipeline should fetch it.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SourceDescriptor {
    /// Creates an enabled source.
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            enabled: true,
        }
    }

    /// Builder-style enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checks the id and endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidSource`] for an empty id or a
    /// non-http(s) endpoint.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::invalid(&self.id, "id is empty"));
        }
        let url = Url::parse(&self.endpoint)
            .map_err(|e| RegistryError::invalid(&self.id, format!("endpoint: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RegistryError::invalid(
                &self.id,
                format!("unsupported endpoint scheme '{}'", url.scheme()),
            ));
        }
        Ok(())
    }
}

/// Keeps the source list, persists it and publishes every change.
pub struct SourceRegistry {
    store: Arc<dyn KeyValueStore>,
    tx: watch::Sender<Vec<SourceDescriptor>>,
    write_lock: Mutex<()>,
}

impl SourceRegistry {
    /// Loads the stored list. Missing or corrupt data starts empty.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Persistence`] when the store cannot be read.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, RegistryError> {
        let sources = match store.get(SOURCES_KEY)? {
            None => Vec::new(),
            Some(json) => match serde_json::from_str::<Vec<SourceDescriptor>>(&json) {
                Ok(sources) => sources,
                Err(e) => {
                    warn!(error = %e, "stored sources are corrupt, starting empty");
                    Vec::new()
                }
            },
        };
        debug!(count = sources.len(), "sources loaded");
        Ok(Self::with_sources(store, sources))
    }

    /// Registry over an in-memory store seeded with `sources`.
    #[must_use]
    pub fn in_memory(sources: Vec<SourceDescriptor>) -> Self {
        Self::with_sources(Arc::new(MemoryStore::new()), sources)
    }

    fn with_sources(store: Arc<dyn KeyValueStore>, sources: Vec<SourceDescriptor>) -> Self {
        let (tx, _rx) = watch::channel(sources);
        Self {
            store,
            tx,
            write_lock: Mutex::new(()),
        }
    }

    /// Current list, in registration order.
    #[must_use]
    pub fn sources(&self) -> Vec<SourceDescriptor> {
        self.tx.borrow().clone()
    }

    /// Enabled sources, in registration order.
    #[must_use]
    pub fn enabled(&self) -> Vec<SourceDescriptor> {
        self.tx.borrow().iter().filter(|s| s.enabled).cloned().collect()
    }

    /// Receiver that observes every published change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<SourceDescriptor>> {
        self.tx.subscribe()
    }

    /// Adds a source or replaces the one with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the descriptor is invalid or persisting fails.
    pub fn upsert(&self, source: SourceDescriptor) -> Result<(), RegistryError> {
        source.validate()?;
        self.mutate(|sources| {
            if let Some(existing) = sources.iter_mut().find(|s| s.id == source.id) {
                *existing = source;
            } else {
                sources.push(source);
            }
            true
        })?;
        Ok(())
    }

    /// Replaces the whole list.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when a descriptor is invalid or persisting fails.
    pub fn replace_all(&self, sources: Vec<SourceDescriptor>) -> Result<(), RegistryError> {
        for source in &sources {
            source.validate()?;
        }
        self.mutate(|current| {
            *current = sources;
            true
        })?;
        Ok(())
    }

    /// Enables or disables a source. Returns `false` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when persisting fails.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<bool, RegistryError> {
        self.mutate(|sources| match sources.iter_mut().find(|s| s.id == id) {
            Some(source) => {
                source.enabled = enabled;
                true
            }
            None => false,
        })
    }

    /// Removes a source. Returns `false` for unknown ids.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when persisting fails.
    pub fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        self.mutate(|sources| {
            let before = sources.len();
            sources.retain(|s| s.id != id);
            sources.len() != before
        })
    }

    /// Applies `change` to a copy of the list; when it reports a change the
    /// copy is persisted and then published.
    fn mutate(
        &self,
        change: impl FnOnce(&mut Vec<SourceDescriptor>) -> bool,
    ) -> Result<bool, RegistryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sources = self.sources();
        if !change(&mut sources) {
            return Ok(false);
        }
        let json = serde_json::to_string(&sources)?;
        self.store.set(SOURCES_KEY, &json)?;
        info!(
            total = sources.len(),
            enabled = sources.iter().filter(|s| s.enabled).count(),
            "source set changed"
        );
        self.tx.send_replace(sources);
        Ok(true)
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &*self.tx.borrow())
            .finish_non_exhaustive()
    }
}
