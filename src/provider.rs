//! Process-wide cache of connection handles, one per parameter set.
//!
//! The first caller for a given parameter set builds the handle; concurrent
//! first callers wait on the same cell, so construction happens once. Handles
//! are never invalidated and live as long as the provider.
//!
//! The first parameter set to resolve is pinned, and later lookups for it
//! skip the map lock entirely.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;
use tracing::info;

/// Builds a client handle from its connection parameters.
pub trait Connector: Send + Sync {
    type Params: Clone + Eq + Hash + Send + Sync;
    type Client: Send + Sync;
    type Error;

    /// Short label for logs.
    fn name(&self) -> &'static str;

    fn connect(&self, params: &Self::Params) -> Result<Self::Client, Self::Error>;
}

/// Lazily-initialized, single-flight handle cache around a [`Connector`].
pub struct CachedClientProvider<C: Connector> {
    connector: C,
    pinned: OnceCell<(C::Params, Arc<C::Client>)>,
    cells: RwLock<HashMap<C::Params, Arc<OnceCell<Arc<C::Client>>>>>,
}

impl<C: Connector> CachedClientProvider<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            pinned: OnceCell::new(),
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached client for `params`, constructing it on first use.
    ///
    /// A failed construction leaves the slot empty so a later call can try
    /// again.
    pub fn get_or_create(&self, params: &C::Params) -> Result<Arc<C::Client>, C::Error> {
        if let Some((pinned, client)) = self.pinned.get() {
            if pinned == params {
                return Ok(client.clone());
            }
        }

        let cell = self.cell_for(params);
        let client = cell
            .get_or_try_init(|| {
                info!("Creating new {} client", self.connector.name());
                self.connector.connect(params).map(Arc::new)
            })?
            .clone();
        // No-op once a parameter set is pinned.
        let _ = self.pinned.set((params.clone(), client.clone()));
        Ok(client)
    }

    fn cell_for(&self, params: &C::Params) -> Arc<OnceCell<Arc<C::Client>>> {
        {
            let cells = self.cells.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cell) = cells.get(params) {
                return cell.clone();
            }
        }
        let mut cells = self.cells.write().unwrap_or_else(|e| e.into_inner());
        cells.entry(params.clone()).or_default().clone()
    }
}
