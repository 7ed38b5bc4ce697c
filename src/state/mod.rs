use serde::Serialize;
use std::sync::Arc;

use crate::backend::{BackendResult, DomainBackend, MemoryBackend, SupabaseBackend};
use crate::config::RelayConfig;
use crate::identity::{IdentityVerifier, StaticTokens, SupabaseVerifier};
use crate::recognize::{RapidApiRecognizer, SongRecognizer};
use crate::rooms::RoomRegistry;
use crate::session::SessionRegistry;

/// Shared relay state, handed to every connection task
pub struct RelayState {
    pub config: RelayConfig,
    pub sessions: SessionRegistry,
    pub rooms: Arc<RoomRegistry>,
    pub backend: Arc<dyn DomainBackend>,
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Song recognition is optional; route 401 reports it as unavailable when absent
    pub recognizer: Option<Arc<dyn SongRecognizer>>,
}

/// Snapshot of live counters for the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub sessions: usize,
    pub authenticated: usize,
    pub rooms: usize,
}

impl RelayState {
    pub fn new(
        config: RelayConfig,
        backend: Arc<dyn DomainBackend>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        Self {
            config,
            sessions: SessionRegistry::new(rooms.clone()),
            rooms,
            backend,
            verifier,
            recognizer: None,
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn SongRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Wire collaborators from configuration: Supabase when configured,
    /// otherwise the in-memory store and the static token table
    pub fn from_config(config: RelayConfig) -> BackendResult<Self> {
        let (backend, verifier): (Arc<dyn DomainBackend>, Arc<dyn IdentityVerifier>) =
            match &config.supabase {
                Some(supabase) => {
                    tracing::info!("Using Supabase backend at {}", supabase.url);
                    (
                        Arc::new(SupabaseBackend::new(supabase)?),
                        Arc::new(SupabaseVerifier::new(supabase)?),
                    )
                }
                None => {
                    tracing::warn!(
                        "Supabase is NOT configured - using the in-memory store; all data is lost on restart!"
                    );
                    let tokens = StaticTokens::new(config.dev_tokens.clone());
                    if tokens.is_empty() {
                        tracing::warn!("RELAY_DEV_TOKENS is empty - no client can authenticate");
                    }
                    (Arc::new(MemoryBackend::new()), Arc::new(tokens))
                }
            };

        let recognizer = match &config.rapidapi {
            Some(rapidapi) => {
                Some(Arc::new(RapidApiRecognizer::new(rapidapi.clone())?) as Arc<dyn SongRecognizer>)
            }
            None => {
                tracing::info!("RAPIDAPI_KEY/RAPIDAPI_HOST not set, song recognition disabled");
                None
            }
        };

        let mut state = Self::new(config, backend, verifier);
        state.recognizer = recognizer;
        Ok(state)
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            sessions: self.sessions.len().await,
            authenticated: self.sessions.authenticated_count().await,
            rooms: self.rooms.room_count().await,
        }
    }
}
