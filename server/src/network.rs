//! Server assembly: listener, accept loop, broadcaster task and shutdown.

use crate::auth::AuthService;
use crate::broadcast::run_broadcaster;
use crate::handler::{handle_connection, HandlerContext};
use crate::sessions::SessionRegistry;
use crate::vehicle::Vehicle;
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};

/// The telemetry server: one accept loop, one broadcaster, one task per
/// connection, all sharing the registry, auth table and vehicle behind
/// their own locks.
pub struct Server {
    listener: TcpListener,
    ctx: HandlerContext,
    broadcast_period: Duration,
}

impl Server {
    /// Binds the listening socket and builds the shared state. Failure to
    /// acquire the port aborts startup.
    pub async fn bind(
        addr: &str,
        max_sessions: usize,
        broadcast_period: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let ctx = HandlerContext {
            registry: Arc::new(RwLock::new(SessionRegistry::new(max_sessions))),
            auth: Arc::new(RwLock::new(AuthService::with_default_accounts())),
            vehicle: Arc::new(Mutex::new(Vehicle::new())),
        };

        Ok(Self {
            listener,
            ctx,
            broadcast_period,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the shutdown signal fires, then closes
    /// every registered session socket and waits for the broadcaster.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let broadcaster = tokio::spawn(run_broadcaster(
            Arc::clone(&self.ctx.registry),
            Arc::clone(&self.ctx.vehicle),
            self.broadcast_period,
            shutdown.clone(),
        ));

        let mut shutdown_rx = shutdown.clone();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            info!("Accepted connection from {}", addr);
                            tokio::spawn(handle_connection(
                                stream,
                                addr,
                                self.ctx.clone(),
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Stopping accept loop");
                    break;
                }
            }
        }

        let writers = self.ctx.registry.write().await.drain_all();
        info!("Closing {} session sockets", writers.len());
        for writer in writers {
            let _ = writer.lock().await.shutdown().await;
        }

        let _ = broadcaster.await;
        info!("Server shut down");
        Ok(())
    }
}
