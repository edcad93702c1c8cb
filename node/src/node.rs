//! Node wiring: payment listener plus transaction relay

use crate::relay::{create_relay, run_relay};
use nearpay_core::{ListenerConfig, NodeConfig};
use nearpay_p2p::PaymentListener;
use std::future::Future;
use tokio::signal;
use tracing::{error, info};

/// Summary of a finished node run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Transactions handed to the relay
    pub relayed: usize,
}

/// NEARPAY node
pub struct NearpayNode {
    config: NodeConfig,
}

impl NearpayNode {
    /// Create a new node
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Run until Ctrl-C
    pub async fn start(&self) -> anyhow::Result<RunSummary> {
        self.run_until(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, stopping node..."),
                Err(e) => error!("Error waiting for shutdown signal: {}", e),
            }
        })
        .await
    }

    /// Run until `shutdown` completes.
    ///
    /// The listener runs on its own thread; stopping it drops the relay's
    /// only sender, which lets the relay task finish.
    pub async fn run_until<F>(&self, shutdown: F) -> anyhow::Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        info!("Starting {}...", self.config.name);

        let (acceptor, queue) = create_relay(self.config.relay.clone());
        let relay = tokio::spawn(run_relay(queue));

        let listener = PaymentListener::bind(&self.config.listener, acceptor)?;
        info!("Listening on {}", listener.listener().local_addr());
        let handle = listener.spawn()?;

        shutdown.await;

        tokio::task::spawn_blocking(move || handle.shutdown())
            .await?
            .map_err(|_| anyhow::anyhow!("payment listener thread panicked"))?;

        let relayed = relay.await?;
        info!("Node stopped, {} transactions relayed", relayed);

        Ok(RunSummary { relayed })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listen_addr(mut self, addr: &str) -> Self {
        self.config.listener.listen_addr = addr.to_string();
        self
    }

    pub fn ack_memo(mut self, memo: Option<String>) -> Self {
        self.config.listener.ack_memo = memo;
        self
    }

    pub fn listener(mut self, listener: ListenerConfig) -> Self {
        self.config.listener = listener;
        self
    }

    pub fn build(self) -> NearpayNode {
        NearpayNode::new(self.config)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
