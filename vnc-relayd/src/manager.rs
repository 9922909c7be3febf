//! Relay manager actor.
//!
//! `RelayManager` owns every live relay and processes `RelayCommand`s one at a
//! time, which keeps at most one relay per connection id. `RelayHandle` is the
//! cloneable front door used by the API layer.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use shared::types::{ProbeResult, RelaySummary, ServerInfo};
use crate::clock::Clock;
use crate::config::Config;
use crate::dns::DnsCache;
use crate::error::RelayError;
use crate::gc::{idle_verdict, IdleVerdict};
use crate::probe;
use crate::relay::{Relay, RelayContext, RelayTarget};

/// Commands sent to the manager task
pub enum RelayCommand {
    /// Port of the live relay for this id, without creating one
    Reuse {
        connection_id: String,
        reply: oneshot::Sender<Option<u16>>,
    },
    Start {
        info: ServerInfo,
        target: RelayTarget,
        reply: oneshot::Sender<Result<u16, RelayError>>,
    },
    Stop {
        connection_id: String,
        reply: oneshot::Sender<bool>,
    },
    CollectIdle(oneshot::Sender<Vec<String>>),
    List(oneshot::Sender<Vec<RelaySummary>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to interact with the relay manager
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayCommand>,
    dns: Arc<DnsCache>,
    probe_timeout: Duration,
}

impl RelayHandle {
    /// Spawn the manager task
    pub fn spawn(config: &Config, dns: Arc<DnsCache>, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel::<RelayCommand>(256);

        let manager = RelayManager {
            relays: HashMap::new(),
            dns: Arc::clone(&dns),
            clock,
            bind_host: config.relay.bind_host.clone(),
            idle_timeout: config.relay.idle_timeout(),
        };
        tokio::spawn(manager.run(rx, config.relay.gc_interval()));

        Self {
            tx,
            dns,
            probe_timeout: config.probe.default_timeout(),
        }
    }

    /// Start (or reuse) the relay for `info.id`. Returns the local port
    /// accepting WebSocket connections.
    pub async fn start_proxy(&self, info: ServerInfo) -> Result<u16, RelayError> {
        validate(&info)?;

        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Reuse {
            connection_id: info.id.clone(),
            reply,
        })
        .await?;
        if let Some(port) = rx.await.map_err(|_| RelayError::ManagerClosed)? {
            return Ok(port);
        }

        // Only a fresh relay needs the target resolved
        let target = RelayTarget {
            host: self.dns.resolve(&info.host).await,
            port: info.target_port(),
        };

        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Start { info, target, reply }).await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)?
    }

    /// Tear down the relay for `connection_id`. Returns false if none existed.
    pub async fn stop_proxy(&self, connection_id: &str) -> Result<bool, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stop {
            connection_id: connection_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    /// Reachability probe; never touches relay state
    pub async fn capture_snapshot(
        &self,
        info: &ServerInfo,
        timeout: Option<Duration>,
    ) -> Result<Option<ProbeResult>, RelayError> {
        validate(info)?;
        let timeout = timeout.unwrap_or(self.probe_timeout);
        Ok(probe::capture_snapshot(&self.dns, info, timeout).await)
    }

    /// Run one garbage-collection tick now. Returns the reclaimed connection ids.
    pub async fn collect_idle(&self) -> Result<Vec<String>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::CollectIdle(reply)).await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    pub async fn list(&self) -> Result<Vec<RelaySummary>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::List(reply)).await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    /// Stop the GC timer, stop every relay and clear the DNS cache
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Shutdown(reply)).await?;
        rx.await.map_err(|_| RelayError::ManagerClosed)
    }

    async fn send(&self, cmd: RelayCommand) -> Result<(), RelayError> {
        self.tx.send(cmd).await.map_err(|_| RelayError::ManagerClosed)
    }
}

struct RelayManager {
    relays: HashMap<String, Relay>,
    dns: Arc<DnsCache>,
    clock: Arc<dyn Clock>,
    bind_host: String,
    idle_timeout: Duration,
}

impl RelayManager {
    async fn run(mut self, mut rx: mpsc::Receiver<RelayCommand>, gc_interval: Duration) {
        let mut gc = tokio::time::interval(gc_interval);
        gc.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle(cmd).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        // Every handle dropped without an explicit shutdown
                        self.stop_all().await;
                        break;
                    }
                },
                _ = gc.tick() => {
                    self.collect_idle().await;
                }
            }
        }
    }

    async fn handle(&mut self, cmd: RelayCommand) -> ControlFlow<()> {
        match cmd {
            RelayCommand::Reuse { connection_id, reply } => {
                let _ = reply.send(self.reuse(&connection_id));
            }
            RelayCommand::Start { info, target, reply } => {
                let result = self.start(info, target).await;
                let _ = reply.send(result);
            }
            RelayCommand::Stop { connection_id, reply } => {
                let removed = self.stop_relay(&connection_id).await;
                let _ = reply.send(removed);
            }
            RelayCommand::CollectIdle(reply) => {
                let reclaimed = self.collect_idle().await;
                let _ = reply.send(reclaimed);
            }
            RelayCommand::List(reply) => {
                let now = self.clock.now();
                let mut summaries: Vec<RelaySummary> =
                    self.relays.values().map(|relay| relay.summary(now)).collect();
                summaries.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
                let _ = reply.send(summaries);
            }
            RelayCommand::Shutdown(reply) => {
                self.stop_all().await;
                self.dns.clear();
                tracing::info!("Relay manager shut down");
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Port of a live relay for `connection_id`, refreshing its activity.
    /// Reuse is keyed on the id alone, even if the target changed.
    fn reuse(&self, connection_id: &str) -> Option<u16> {
        let relay = self.relays.get(connection_id)?;
        if !relay.is_listening() {
            return None;
        }

        relay.context.activity.touch();
        tracing::debug!(relay = %connection_id, port = relay.listen_port, "Reusing relay");
        Some(relay.listen_port)
    }

    async fn start(&mut self, info: ServerInfo, target: RelayTarget) -> Result<u16, RelayError> {
        // A concurrent start for the same id may have won the race
        if let Some(port) = self.reuse(&info.id) {
            return Ok(port);
        }

        if self.relays.contains_key(&info.id) {
            tracing::warn!(relay = %info.id, "Relay listener is no longer serving, recreating");
            self.stop_relay(&info.id).await;
        }

        let bind_error = |source| RelayError::PortBind {
            bind_host: self.bind_host.clone(),
            source,
        };

        let listener = TcpListener::bind((self.bind_host.as_str(), 0))
            .await
            .map_err(bind_error)?;

        let context = Arc::new(RelayContext::new(info.id.clone(), target, Arc::clone(&self.clock)));
        let relay = Relay::serve(listener, context, info.display_name.clone()).map_err(bind_error)?;
        let port = relay.listen_port;

        tracing::info!(
            relay = %info.id,
            name = info.label(),
            port,
            upstream = %format!("{}:{}", relay.context.target.host, relay.context.target.port),
            "Started relay"
        );

        self.relays.insert(info.id, relay);
        Ok(port)
    }

    async fn stop_relay(&mut self, connection_id: &str) -> bool {
        let Some(relay) = self.relays.remove(connection_id) else {
            return false;
        };

        let port = relay.listen_port;
        relay.stop().await;
        tracing::info!(relay = %connection_id, port, "Stopped relay");
        true
    }

    async fn stop_all(&mut self) {
        let ids: Vec<String> = self.relays.keys().cloned().collect();
        for id in ids {
            self.stop_relay(&id).await;
        }
    }

    async fn collect_idle(&mut self) -> Vec<String> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        for (id, relay) in &self.relays {
            let activity = &relay.context.activity;
            match idle_verdict(activity.active_clients(), activity.last_activity(), now, self.idle_timeout) {
                IdleVerdict::InUse => activity.touch(),
                IdleVerdict::Idle => {}
                IdleVerdict::Expired => expired.push(id.clone()),
            }
        }

        for id in &expired {
            tracing::info!(relay = %id, "Reclaiming idle relay");
            self.stop_relay(id).await;
        }

        let swept = self.dns.sweep();
        if swept > 0 {
            tracing::debug!(swept, remaining = self.dns.len(), "Swept old DNS cache entries");
        }

        expired
    }
}

fn validate(info: &ServerInfo) -> Result<(), RelayError> {
    if info.id.trim().is_empty() {
        return Err(RelayError::InvalidServerInfo("id must not be empty".to_string()));
    }
    if info.host.trim().is_empty() {
        return Err(RelayError::InvalidServerInfo("host must not be empty".to_string()));
    }
    if info.host.chars().any(char::is_whitespace) {
        return Err(RelayError::InvalidServerInfo(format!(
            "host {:?} must not contain whitespace",
            info.host
        )));
    }
    if info.port == Some(0) {
        return Err(RelayError::InvalidServerInfo(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}
