//! NPLT server
//!
//! Accepts TCP connections up to `max_clients`, runs one read task and one
//! writer task per connection, and two periodic sweeps over the registry:
//! heartbeats for quiet sessions and removal of silent ones. The RDT endpoint
//! used for download offers runs alongside.

mod connection;
mod dispatch;
mod sweep;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use parley_common::transport::{shutdown_channel, RdtServer, ShutdownSignal};
use parley_common::{Result, SessionId};

use crate::collaborators::Collaborators;
use crate::config::ServerConfig;
use crate::registry::{Registry, RegistrySnapshot};
use crate::session::Session;
use crate::transfer::{TransferManager, TransferRoute};

pub use sweep::sweep_timeouts;

/// State shared by every connection task
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) registry: Arc<Registry>,
    pub(crate) collaborators: Collaborators,
    pub(crate) transfers: Arc<TransferManager>,
}

/// A bound, not yet running server
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

/// Cloneable handle for talking to a running server
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    rdt_addr: SocketAddr,
}

impl Server {
    /// Bind the NPLT listener and the RDT endpoint
    pub async fn bind(config: ServerConfig, collaborators: Collaborators) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let rdt = Arc::new(RdtServer::bind(config.rdt_listen_addr, config.rdt.clone()).await?);
        let registry = Registry::new(config.max_clients);
        let transfers = Arc::new(TransferManager::new(
            registry.clone(),
            rdt,
            config.advertised_host.clone(),
        )?);

        info!("NPLT listener bound to {}", listener.local_addr()?);
        Ok(Self {
            listener,
            state: Arc::new(ServerState {
                config,
                registry,
                collaborators,
                transfers,
            }),
        })
    }

    pub fn handle(&self) -> Result<ServerHandle> {
        Ok(ServerHandle {
            state: self.state.clone(),
            local_addr: self.listener.local_addr()?,
            rdt_addr: self.state.transfers.rdt().local_addr()?,
        })
    }

    /// Serve until `shutdown` fires, then drain connections
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<()> {
        let state = self.state.clone();

        let rdt = state.transfers.rdt().clone();
        let rdt_shutdown = shutdown.clone();
        let rdt_task = tokio::spawn(async move {
            if let Err(e) = rdt.run(rdt_shutdown).await {
                error!("RDT server error: {}", e);
            }
        });

        tokio::spawn(sweep::heartbeat_sweep(
            state.registry.clone(),
            state.config.heartbeat_interval(),
            shutdown.clone(),
        ));
        tokio::spawn(sweep::timeout_sweep(
            state.registry.clone(),
            state.config.session_timeout(),
            state.config.timeout_sweep_interval(),
            shutdown.clone(),
        ));

        self.accept_loop(shutdown).await;

        info!("Closing {} active sessions", state.registry.len());
        for session in state.registry.sessions() {
            session.close();
        }

        let drain_timeout = state.config.drain_timeout();
        let drained = tokio::time::timeout(drain_timeout, async {
            while !state.registry.is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await;
        match drained {
            Ok(()) => info!("All connections drained successfully"),
            Err(_) => warn!("Drain timeout reached, forcing shutdown"),
        }

        let _ = rdt_task.await;
        Ok(())
    }

    async fn accept_loop(&self, mut shutdown: ShutdownSignal) {
        info!("NPLT server accepting connections");
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                },
                _ = shutdown.wait() => {
                    info!("NPLT listener shutting down");
                    return;
                }
            };

            let state = self.state.clone();
            let model = state.collaborators.models.default_model();
            // Replaced with a stored conversation once the connection task starts
            let (session, outbound) = Session::new(peer, SessionId::new(), model);
            let session = Arc::new(session);

            if let Err(e) = state.registry.register(session.clone()) {
                warn!(%peer, "Rejecting connection: {}", e);
                drop(stream);
                continue;
            }

            let conn_shutdown = shutdown.clone();
            tokio::spawn(async move {
                connection::handle_connection(state, session, outbound, stream, conn_shutdown).await;
            });
        }
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn rdt_addr(&self) -> SocketAddr {
        self.rdt_addr
    }

    pub fn session_count(&self) -> usize {
        self.state.registry.len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.state.registry.sessions().iter().map(|s| s.id()).collect()
    }

    pub fn stats(&self) -> RegistrySnapshot {
        self.state.registry.stats()
    }

    /// Send a file to a connected client over the transport that suits it
    pub fn offer_download(&self, session_id: SessionId, filename: &str, data: Bytes) -> Result<TransferRoute> {
        self.state.transfers.offer_download(session_id, filename, data)
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.local_addr)
            .field("rdt_addr", &self.rdt_addr)
            .finish()
    }
}

/// Run the server until Ctrl+C or SIGTERM
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let collaborators = Collaborators::defaults(&config);
    let server = Server::bind(config, collaborators).await?;
    let handle = server.handle()?;

    info!("parley server started");
    info!("  NPLT listener: {}", handle.local_addr());
    info!("  RDT endpoint: {}", handle.rdt_addr());

    let (trigger, signal) = shutdown_channel();
    let server_task = tokio::spawn(server.run(signal));

    wait_for_shutdown().await;
    info!("Initiating graceful shutdown...");
    trigger.trigger();

    server_task.await??;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parley_common::transport::RdtConfig;

    /// Server state on loopback ports with default collaborators
    pub(crate) async fn test_state(config: ServerConfig) -> Arc<ServerState> {
        let registry = Registry::new(config.max_clients);
        let rdt = RdtServer::bind("127.0.0.1:0", RdtConfig::default()).await.unwrap();
        let transfers = Arc::new(
            TransferManager::new(registry.clone(), Arc::new(rdt), "127.0.0.1".into()).unwrap(),
        );
        Arc::new(ServerState {
            collaborators: Collaborators::defaults(&config),
            config,
            registry,
            transfers,
        })
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            rdt_listen_addr: "127.0.0.1:0".parse().unwrap(),
            drain_timeout_secs: 1,
            ..ServerConfig::default()
        };
        let collaborators = Collaborators::defaults(&config);
        let server = Server::bind(config, collaborators).await.unwrap();
        let handle = server.handle().unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert_eq!(handle.session_count(), 0);

        let (trigger, signal) = shutdown_channel();
        let task = tokio::spawn(server.run(signal));
        trigger.trigger();
        let result = tokio::time::timeout(std::time::Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
