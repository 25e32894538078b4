//! Per-connection session lifecycle.
//!
//! A [`SessionController`] owns one connection from setup to persistence. It
//! talks to the transport only through [`Inbound`]/[`Outbound`] channels, so
//! the same controller runs behind the WebSocket server and in tests.

pub mod controller;
pub mod enrollment;
pub mod protocol;
pub mod registry;

pub use controller::{SessionController, SessionReport};
pub use enrollment::{EnrollOutcome, VoiceEnrollment};
pub use protocol::{Inbound, Outbound, ServerMessage, SetupMessage, UserInfo};
pub use registry::{SessionInfo, SessionKind, SessionRegistry, SessionState, SessionTicket};

use crate::config::Config;
use crate::finalize::FinalizationPipeline;
use crate::providers::Providers;
use crate::speaker::cache::EmbeddingCache;
use crate::store::ConversationStore;
use crate::streaming::ChunkAnalyzer;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Process-wide state shared by every session.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn ConversationStore>,
    pub embeddings: Arc<EmbeddingCache>,
    pub registry: Arc<SessionRegistry>,
    pub analyzer: ChunkAnalyzer,
    pub finalizer: FinalizationPipeline,
    pub enrollment: VoiceEnrollment,
}

impl SessionContext {
    pub fn new(config: Config, providers: Providers, store: Arc<dyn ConversationStore>) -> Self {
        let permits = Arc::new(Semaphore::new(config.analysis.max_concurrent));
        let embeddings = Arc::new(EmbeddingCache::new());
        let analyzer = ChunkAnalyzer::new(providers.clone(), permits, &config);
        let finalizer = FinalizationPipeline::new(providers.clone(), store.clone(), &config);
        let enrollment = VoiceEnrollment::new(providers, store.clone(), embeddings.clone(), &config);
        Self {
            config: Arc::new(config),
            store,
            embeddings,
            registry: Arc::new(SessionRegistry::new()),
            analyzer,
            finalizer,
            enrollment,
        }
    }
}
