//! Application state
//!
//! Shared state across all handlers. The retrieval service and its ports
//! are built once at startup; nothing is lazily initialized at request
//! time.

use std::sync::Arc;

use parking_lot::RwLock;

use evidence_config::Settings;
use evidence_retrieval::{KnowledgeService, RetrievalContractService};

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration wrapped in RwLock for hot-reload support
    pub config: Arc<RwLock<Settings>>,
    /// Retrieval contract service (owns the ports)
    pub service: Arc<RetrievalContractService>,
    /// Grounded-context service for the answer endpoint
    pub knowledge: Arc<KnowledgeService>,
}

impl AppState {
    /// Build state with the shipped HTTP port implementations.
    pub fn new(config: Settings) -> Self {
        let service = Arc::new(RetrievalContractService::from_settings(&config));
        Self::with_service(config, service)
    }

    /// Build state around an existing service (tests plug fakes in here).
    pub fn with_service(config: Settings, service: Arc<RetrievalContractService>) -> Self {
        let knowledge = Arc::new(KnowledgeService::new(Arc::clone(&service)));
        Self {
            config: Arc::new(RwLock::new(config)),
            service,
            knowledge,
        }
    }

    pub fn get_config(&self) -> Settings {
        self.config.read().clone()
    }
}
