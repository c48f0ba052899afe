// crates/calib-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Campaign Store
// Description: Process-local CampaignStore and a shared trait-object wrapper.
// Purpose: Back the service in tests and store-less deployments.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryCampaignStore`] keeps the latest record per campaign in a mutex
//! guarded map. Clones share the same map, so a test can hand one clone to a
//! service, drop the service, and restore a fresh service from the other.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::CampaignId;
use crate::core::CampaignState;
use crate::interfaces::CampaignStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

/// In-memory campaign store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCampaignStore {
    /// Latest record per campaign.
    campaigns: Arc<Mutex<BTreeMap<CampaignId, CampaignState>>>,
}

impl InMemoryCampaignStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CampaignStore for InMemoryCampaignStore {
    fn load(&self, campaign_id: CampaignId) -> Result<Option<CampaignState>, StoreError> {
        let guard = self
            .campaigns
            .lock()
            .map_err(|_| StoreError::Store("campaign store mutex poisoned".to_string()))?;
        Ok(guard.get(&campaign_id).cloned())
    }

    fn save(&self, state: &CampaignState) -> Result<(), StoreError> {
        self.campaigns
            .lock()
            .map_err(|_| StoreError::Store("campaign store mutex poisoned".to_string()))?
            .insert(state.campaign_id, state.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<CampaignId>, StoreError> {
        let guard = self
            .campaigns
            .lock()
            .map_err(|_| StoreError::Store("campaign store mutex poisoned".to_string()))?;
        Ok(guard.keys().copied().collect())
    }

    fn delete(&self, campaign_id: CampaignId) -> Result<(), StoreError> {
        self.campaigns
            .lock()
            .map_err(|_| StoreError::Store("campaign store mutex poisoned".to_string()))?
            .remove(&campaign_id);
        Ok(())
    }
}

// ============================================================================
// SECTION: Shared Store
// ============================================================================

/// Clonable wrapper around any campaign store.
#[derive(Clone)]
pub struct SharedCampaignStore {
    /// Inner store.
    inner: Arc<dyn CampaignStore>,
}

impl SharedCampaignStore {
    /// Wraps a store value.
    #[must_use]
    pub fn from_store(store: impl CampaignStore + 'static) -> Self {
        Self { inner: Arc::new(store) }
    }

    /// Wraps an existing shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { inner: store }
    }
}

impl CampaignStore for SharedCampaignStore {
    fn load(&self, campaign_id: CampaignId) -> Result<Option<CampaignState>, StoreError> {
        self.inner.load(campaign_id)
    }

    fn save(&self, state: &CampaignState) -> Result<(), StoreError> {
        self.inner.save(state)
    }

    fn list(&self) -> Result<Vec<CampaignId>, StoreError> {
        self.inner.list()
    }

    fn delete(&self, campaign_id: CampaignId) -> Result<(), StoreError> {
        self.inner.delete(campaign_id)
    }
}
