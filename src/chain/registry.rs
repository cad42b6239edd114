use std::collections::HashMap;
use std::sync::Arc;

use super::adapter::ChainAdapter;
use crate::core_types::Network;
use crate::error::CustodyError;

/// Network → adapter map. One adapter per network.
#[derive(Debug, Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<Network, Arc<dyn ChainAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an adapter to the network it reports. Replaces any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) -> &mut Self {
        self.adapters.insert(adapter.network(), adapter);
        self
    }

    pub fn get(&self, network: Network) -> Result<Arc<dyn ChainAdapter>, CustodyError> {
        self.adapters
            .get(&network)
            .cloned()
            .ok_or(CustodyError::UnsupportedNetwork(network))
    }

    pub fn contains(&self, network: Network) -> bool {
        self.adapters.contains_key(&network)
    }

    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<_> = self.adapters.keys().copied().collect();
        networks.sort_by_key(|n| n.as_str());
        networks
    }
}
