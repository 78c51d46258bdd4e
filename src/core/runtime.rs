//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: metadata → master → cache sweeper
//! - Shutdown order: cache sweeper → master

use crate::core::config::Config;
use crate::master::{Master, Providers};
use crate::metadata::fixture::StaticMetadata;
use crate::ops::observability::HealthStatus;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Metadata snapshot.
    pub metadata: ComponentHealth,
    /// Master core.
    pub master: ComponentHealth,
    /// Periodic cache sweeper.
    pub sweeper: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            metadata: ComponentHealth::Starting,
            master: ComponentHealth::Starting,
            sweeper: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.metadata, self.master, self.sweeper),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.metadata, self.master),
            (ComponentHealth::Failed, _) | (_, ComponentHealth::Failed)
        )
    }
}

/// Hostplane runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Master core, once started.
    master: Option<Arc<Master>>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    /// Cache sweeper task handle.
    sweeper: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            master: None,
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            sweeper: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the master core (if started).
    pub fn master(&self) -> Option<&Arc<Master>> {
        self.master.as_ref()
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is alive.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Probe the master's metadata store.
    pub fn probe(&self) -> HealthStatus {
        match &self.master {
            Some(master) => master.health(),
            None => HealthStatus::unhealthy("master not started"),
        }
    }

    /// Load metadata, build the master and start the cache sweeper.
    pub async fn start(&mut self) -> Result<()> {
        let metadata_path = PathBuf::from(&self.config.paths.metadata);
        tracing::info!(
            metadata = %metadata_path.display(),
            "starting Hostplane runtime"
        );

        let metadata = match StaticMetadata::from_file(&metadata_path) {
            Ok(metadata) => Arc::new(metadata),
            Err(e) => {
                self.health.metadata = ComponentHealth::Failed;
                return Err(e);
            }
        };
        self.health.metadata = ComponentHealth::Healthy;

        self.start_with(Providers::from_static(metadata)).await
    }

    /// Start on explicit providers.
    pub async fn start_with(&mut self, providers: Providers) -> Result<()> {
        self.health.metadata = ComponentHealth::Healthy;

        let master = Arc::new(Master::new(&self.config, providers).context("failed to build master")?);
        self.master = Some(Arc::clone(&master));
        self.health.master = ComponentHealth::Healthy;

        self.start_sweeper(master);

        self.running.store(true, Ordering::Release);
        tracing::info!("Hostplane runtime started");
        Ok(())
    }

    /// Spawn the periodic expired-entry purge.
    fn start_sweeper(&mut self, master: Arc<Master>) {
        let interval = self.config.cache.sweep_interval();
        let mut shutdown_rx = self.shutdown_receiver();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = master.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "expired cache entries purged");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("cache sweeper stopped");
        });

        self.sweeper = Some(handle);
        self.health.sweeper = ComponentHealth::Healthy;
        tracing::info!(interval_secs = interval.as_secs(), "cache sweeper started");
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_receiver();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until Ctrl-C or a shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = self.wait_for_shutdown() => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components in reverse start order.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Hostplane runtime");
        self.running.store(false, Ordering::Release);

        let _ = self.shutdown_tx.send(true);

        self.health.sweeper = ComponentHealth::Stopping;
        if let Some(handle) = self.sweeper.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "cache sweeper task panicked"),
                Err(_) => tracing::warn!("cache sweeper stop timed out"),
            }
        }
        self.health.sweeper = ComponentHealth::Stopped;

        self.health.master = ComponentHealth::Stopping;
        if let Some(master) = self.master.take() {
            for (name, stats) in master.cache_stats() {
                tracing::info!(
                    cache = %name,
                    entries = stats.entries,
                    hits = stats.hits,
                    misses = stats.misses,
                    "final cache statistics"
                );
            }
        }
        self.health.master = ComponentHealth::Stopped;

        tracing::info!("Hostplane runtime stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_runtime_is_alive_but_not_ready() {
        let runtime = Runtime::new(Config::default()).unwrap();
        assert!(runtime.is_alive());
        assert!(!runtime.is_ready());
        assert!(!runtime.probe().healthy);
    }
}
