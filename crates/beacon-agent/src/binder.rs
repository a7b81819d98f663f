//! # Bind Queue
//!
//! Background worker that binds and unbinds providers off the event loop.
//!
//! ```text
//! ┌───────────────┐  BindCommand   ┌──────────────────────────────────────┐
//! │ AgentService  │ ─────────────► │ BindQueue task                       │
//! │ (event loop)  │                │   for each provider, in order:       │
//! │               │ ◄───────────── │     spawn_blocking(unbind?/bind)     │
//! └───────────────┘ ServiceConnected└──────────────────────────────────────┘
//! ```
//!
//! The provider list of a command is fixed when the command is queued.
//! Binding an already bound provider and unbinding an unbound one are
//! no-ops.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{AgentError, AgentResult};
use crate::events::AgentEvent;
use crate::provider::DeviceProvider;

enum BindCommand {
    Bind {
        providers: Vec<Arc<dyn DeviceProvider>>,
        unbind_first: bool,
    },
    Unbind(Vec<Arc<dyn DeviceProvider>>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for queueing bind work.
#[derive(Clone)]
pub struct BindQueueHandle {
    cmd_tx: mpsc::UnboundedSender<BindCommand>,
}

impl BindQueueHandle {
    /// Queues binding of `providers`.
    ///
    /// With `unbind_first`, bound providers are unbound before binding again.
    pub fn bind(&self, providers: Vec<Arc<dyn DeviceProvider>>, unbind_first: bool) {
        if providers.is_empty() {
            return;
        }
        if self
            .cmd_tx
            .send(BindCommand::Bind {
                providers,
                unbind_first,
            })
            .is_err()
        {
            warn!("Bind queue stopped, dropping bind request");
        }
    }

    /// Queues unbinding of `providers`.
    pub fn unbind(&self, providers: Vec<Arc<dyn DeviceProvider>>) {
        if providers.is_empty() {
            return;
        }
        if self.cmd_tx.send(BindCommand::Unbind(providers)).is_err() {
            warn!("Bind queue stopped, dropping unbind request");
        }
    }

    /// Waits until everything queued before this call has run.
    pub async fn flush(&self) -> AgentResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(BindCommand::Flush(tx))
            .map_err(|_| AgentError::Channel("Bind queue closed".into()))?;
        rx.await
            .map_err(|_| AgentError::Channel("Bind queue dropped flush".into()))
    }

    /// Runs the queued work, then stops the worker.
    pub async fn shutdown(&self) -> AgentResult<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(BindCommand::Shutdown(tx))
            .map_err(|_| AgentError::Channel("Bind queue closed".into()))?;
        rx.await
            .map_err(|_| AgentError::Channel("Bind queue dropped shutdown".into()))
    }
}

/// The bind worker.
pub struct BindQueue {
    events: Option<mpsc::Sender<AgentEvent>>,
}

impl BindQueue {
    /// Starts the worker on the current runtime.
    ///
    /// Successful binds are reported as `ServiceConnected` on `events`.
    pub fn spawn(events: Option<mpsc::Sender<AgentEvent>>) -> BindQueueHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let queue = BindQueue { events };

        tokio::spawn(async move {
            queue.run(cmd_rx).await;
        });

        BindQueueHandle { cmd_tx }
    }

    async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<BindCommand>) {
        debug!("Bind queue started");

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                BindCommand::Bind {
                    providers,
                    unbind_first,
                } => {
                    for provider in providers {
                        self.bind_one(provider, unbind_first).await;
                    }
                }
                BindCommand::Unbind(providers) => {
                    for provider in providers {
                        Self::unbind_one(provider).await;
                    }
                }
                BindCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
                BindCommand::Shutdown(ack) => {
                    info!("Bind queue shutting down");
                    let _ = ack.send(());
                    break;
                }
            }
        }
    }

    async fn bind_one(&self, provider: Arc<dyn DeviceProvider>, unbind_first: bool) {
        let id = provider.id();
        let worker = Arc::clone(&provider);
        let result = tokio::task::spawn_blocking(move || -> AgentResult<bool> {
            if unbind_first && worker.is_bound() {
                worker.unbind()?;
            }
            if worker.is_bound() {
                return Ok(false);
            }
            worker.bind()?;
            Ok(true)
        })
        .await;

        match result {
            Ok(Ok(true)) => {
                info!(provider = %id, "Provider bound");
                if let Some(events) = &self.events {
                    if events
                        .send(AgentEvent::ServiceConnected(id.clone()))
                        .await
                        .is_err()
                    {
                        warn!(provider = %id, "Agent stopped, bound provider not reported");
                    }
                }
            }
            Ok(Ok(false)) => debug!(provider = %id, "Provider already bound"),
            Ok(Err(e)) => error!(provider = %id, error = %e, "Failed to bind provider"),
            Err(e) => error!(provider = %id, error = %e, "Bind task panicked"),
        }
    }

    async fn unbind_one(provider: Arc<dyn DeviceProvider>) {
        let id = provider.id();
        let result = tokio::task::spawn_blocking(move || -> AgentResult<bool> {
            if !provider.is_bound() {
                return Ok(false);
            }
            provider.unbind()?;
            Ok(true)
        })
        .await;

        match result {
            Ok(Ok(true)) => info!(provider = %id, "Provider unbound"),
            Ok(Ok(false)) => debug!(provider = %id, "Provider was not bound"),
            Ok(Err(e)) => error!(provider = %id, error = %e, "Failed to unbind provider"),
            Err(e) => error!(provider = %id, error = %e, "Unbind task panicked"),
        }
    }
}
