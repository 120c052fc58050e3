//! Provider failover.

use std::sync::Arc;

use super::ModelTransport;
use crate::error::{LatheError, Result};

/// Ordered set of transports with round-robin failover.
///
/// The first transport is the primary. [`ProviderPool::advance`] moves to
/// the next one, wrapping around, until `max_failovers` switches have been
/// spent. [`ProviderPool::reset`] returns to the primary for a new turn.
#[derive(Clone)]
pub struct ProviderPool {
    providers: Vec<Arc<dyn ModelTransport>>,
    current: usize,
    failovers: u32,
    max_failovers: u32,
}

impl ProviderPool {
    pub fn new(providers: Vec<Arc<dyn ModelTransport>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(LatheError::Configuration(
                "at least one model transport is required".to_string(),
            ));
        }
        let max_failovers = providers.len().saturating_sub(1) as u32;
        Ok(Self {
            providers,
            current: 0,
            failovers: 0,
            max_failovers,
        })
    }

    pub fn single(provider: Arc<dyn ModelTransport>) -> Self {
        Self {
            providers: vec![provider],
            current: 0,
            failovers: 0,
            max_failovers: 0,
        }
    }

    /// Override the failover bound. Defaults to pool size minus one.
    pub fn with_max_failovers(mut self, max_failovers: u32) -> Self {
        self.max_failovers = max_failovers;
        self
    }

    pub fn current(&self) -> &Arc<dyn ModelTransport> {
        &self.providers[self.current]
    }

    pub fn current_name(&self) -> &str {
        self.current().provider_name()
    }

    /// Switch to the next transport, or `None` once failovers are spent.
    pub fn advance(&mut self) -> Option<&Arc<dyn ModelTransport>> {
        if self.providers.len() < 2 || self.failovers >= self.max_failovers {
            return None;
        }
        let from = self.current;
        self.current = (self.current + 1) % self.providers.len();
        self.failovers += 1;
        tracing::warn!(
            from = %self.providers[from].provider_name(),
            to = %self.providers[self.current].provider_name(),
            failovers = self.failovers,
            "failing over to next provider"
        );
        Some(&self.providers[self.current])
    }

    /// Back to the primary with a fresh failover allowance.
    pub fn reset(&mut self) {
        self.current = 0;
        self.failovers = 0;
    }

    pub fn failovers(&self) -> u32 {
        self.failovers
    }

    pub fn max_failovers(&self) -> u32 {
        self.max_failovers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.provider_name()).collect();
        f.debug_struct("ProviderPool")
            .field("providers", &names)
            .field("current", &self.current)
            .field("failovers", &self.failovers)
            .field("max_failovers", &self.max_failovers)
            .finish()
    }
}
