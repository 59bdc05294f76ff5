//! Capability service
//!
//! Brokers between the cache and the detector: cached snapshots are served
//! as-is, misses trigger detection, and explicit refreshes bypass the
//! cache while flagging the router as refreshing so concurrent readers can
//! surface "stale while refreshing".

use std::sync::Arc;
use tracing::{debug, instrument};

use super::cache::CapabilityCache;
use super::detector::CapabilityDetector;
use super::snapshot::CapabilitySnapshot;
use crate::domain_types::RouterId;
use crate::errors::CoreResult;
use crate::transport::SharedRouterTransport;

/// Cache-or-detect access to router capabilities.
#[derive(Debug, Clone)]
pub struct CapabilityService {
    cache: Arc<CapabilityCache>,
    detector: CapabilityDetector,
}

impl CapabilityService {
    /// Creates a service over a shared cache and a detector
    pub fn new(cache: Arc<CapabilityCache>, detector: CapabilityDetector) -> Self {
        Self { cache, detector }
    }

    /// The shared cache, for invalidation by other components
    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    /// Returns the cached snapshot when present and unexpired; otherwise
    /// detects, stores, and returns fresh facts.
    #[instrument(skip(self, transport), fields(router_id = %router_id))]
    pub async fn get_capabilities(
        &self,
        transport: &SharedRouterTransport,
        router_id: &RouterId,
    ) -> CoreResult<CapabilitySnapshot> {
        if let Some(snapshot) = self.cache.get(router_id) {
            debug!("capability cache hit");
            return Ok(snapshot);
        }

        let snapshot = self.detector.detect(transport, router_id).await?;
        self.cache.set(snapshot.clone());
        Ok(snapshot)
    }

    /// Bypasses the cache: detects and stores unconditionally. The
    /// refreshing flag is visible to concurrent `get_capabilities` callers
    /// for the duration of the detection.
    #[instrument(skip(self, transport), fields(router_id = %router_id))]
    pub async fn refresh_capabilities(
        &self,
        transport: &SharedRouterTransport,
        router_id: &RouterId,
    ) -> CoreResult<CapabilitySnapshot> {
        self.cache.mark_refreshing(router_id, true);
        let result = self.detector.detect(transport, router_id).await;
        match result {
            Ok(snapshot) => {
                // set() clears the refreshing flag.
                self.cache.set(snapshot.clone());
                Ok(snapshot)
            }
            Err(err) => {
                self.cache.mark_refreshing(router_id, false);
                Err(err)
            }
        }
    }
}
