// Registry of the sub-exposures a link or exposure has handed out.
// Releasing the owner releases every sub-exposure it still holds.

use super::exposer::{Exposure, Parent};
use crate::config::Config;
use crate::endpoint::Port;
use crate::ids::{ExposureId, ExposureIdAllocator};
use crate::Value;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct SubEndpoints {
    exposures: DashMap<ExposureId, Exposure>,
    ids: ExposureIdAllocator,
}

impl SubEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `root` on `endpoint` and record the exposure under a fresh id.
    pub(crate) fn spawn(
        self: &Arc<Self>,
        root: Value,
        endpoint: Port,
        config: &Config,
    ) -> ExposureId {
        let id = self.ids.allocate();
        let parent = Parent::new(Arc::downgrade(self), id);
        let exposure = Exposure::spawn(root, endpoint, config.clone(), Some(parent));
        self.exposures.insert(id, exposure.clone());
        if exposure.is_closed() {
            self.exposures.remove(&id);
        }
        debug!("Spawned sub-endpoint {}", id);
        id
    }

    pub fn get(&self, id: ExposureId) -> Option<Exposure> {
        self.exposures.get(&id).map(|entry| entry.value().clone())
    }

    /// Close one sub-exposure. Returns false if it was already gone.
    pub fn release(&self, id: ExposureId) -> bool {
        match self.exposures.remove(&id) {
            Some((_, exposure)) => {
                exposure.close();
                debug!("Released sub-endpoint {}", id);
                true
            }
            None => false,
        }
    }

    pub fn release_all(&self) {
        let ids = self.ids();
        if ids.is_empty() {
            return;
        }
        for id in &ids {
            self.release(*id);
        }
        info!("Released {} sub-endpoints", ids.len());
    }

    /// Drop the record of a sub-exposure that closed on its own.
    pub(crate) fn forget(&self, id: ExposureId) {
        if self.exposures.remove(&id).is_some() {
            debug!("Sub-endpoint {} closed by peer", id);
        }
    }

    pub fn ids(&self) -> Vec<ExposureId> {
        self.exposures.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.exposures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposures.is_empty()
    }
}
