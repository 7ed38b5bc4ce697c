use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::driver::run_connection;
use crate::router::Router;
use crate::state::RelayState;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// TCP listener that hands every accepted socket to its own connection task
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
    router: Arc<Router>,
}

impl RelayServer {
    pub async fn bind(
        addr: SocketAddr,
        state: Arc<RelayState>,
        router: Arc<Router>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        Ok(Self {
            listener,
            state,
            router,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips, then wait for open connections to wind down.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let mut connections = JoinSet::new();
        tracing::info!("Relay listening on {}", self.listener.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("Could not set TCP_NODELAY for {}: {}", peer, e);
                    }
                    let (reader, writer) = stream.into_split();
                    connections.spawn(run_connection(
                        reader,
                        writer,
                        peer,
                        self.state.clone(),
                        self.router.clone(),
                        shutdown.clone(),
                    ));
                }
            }
        }

        tracing::info!(
            "Shutting down, waiting for {} connection(s) to close",
            connections.len()
        );
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}
