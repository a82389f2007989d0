//! Shutdown coordination, grounded on the teacher's `core/shutdown.rs`
//! (`watch`-channel trigger + registered `JoinHandle`s awaited with a
//! bounded timeout), extended with this crate's explicit stop order:
//! Tailer, then the Bridge's heartbeat/watchdog/inbound tasks, then the
//! Dispatch worker, with the Bus drained last so nothing published by the
//! other subsystems during shutdown is lost.

use std::sync::Arc;
use std::time::Duration;

use scbridge_core::bridge::RealtimeBridge;
use scbridge_core::dispatch::DispatchQueue;
use scbridge_core::{constants::SHUTDOWN_TIMEOUT_SECS, MessageBus};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct ShutdownService {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    bridge: RealtimeBridge,
    dispatch: DispatchQueue,
    bus: MessageBus,
}

impl ShutdownService {
    pub fn new(bridge: RealtimeBridge, dispatch: DispatchQueue, bus: MessageBus) -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx, handles: Arc::new(Mutex::new(Vec::new())), bridge, dispatch, bus }
    }

    pub async fn register(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Stop order: Tailer (registered task handles, which have no
    /// cooperative stop signal of their own and are aborted directly) →
    /// Bridge → Dispatch → Bus. The Bus goes last so any shutdown-time
    /// events those stages publish are still delivered.
    pub async fn shutdown(&self) {
        tracing::debug!("initiating graceful shutdown");
        self.trigger();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in &handles {
            handle.abort();
        }
        let timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => tracing::debug!("tailer/background tasks stopped"),
            Err(_) => tracing::warn!(timeout_secs = timeout.as_secs(), "timed out waiting for background tasks"),
        }

        self.bridge.disconnect().await.ok();
        self.bridge.stop();
        tracing::debug!("bridge stopped");

        self.dispatch.stop();
        tracing::debug!("dispatch worker stopping");

        self.bus.stop();
        tracing::debug!("bus stopped");
    }

    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            let _ = rx.wait_for(|&v| v).await;
        }
    }

    pub fn install_signal_handlers(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::debug!("received Ctrl+C, shutting down"),
                _ = terminate => tracing::debug!("received SIGTERM, shutting down"),
            }

            service.trigger();
        });
    }
}
