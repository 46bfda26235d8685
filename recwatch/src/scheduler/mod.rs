//! Scheduler: owns one recording session per registered channel.
//!
//! The scheduler is the fan-out point between the registry and the
//! per-channel session actors. It holds no per-channel recording state of
//! its own — each session self-schedules its polls — and exists to keep
//! the actor set in lockstep with the registry: spawn on boot and on add,
//! stop on remove, stop everything on shutdown.
//!
//! Add and remove serialize on the session map so a registry mutation and
//! its session bookkeeping are applied together; the forced stop of a
//! removed channel's capture happens outside that lock, so one channel's
//! (bounded) stop never delays commands for other channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::notify::NotificationHub;
use crate::probe::{ProbeError, StatusProber};
use crate::recorder::launcher::ProcessLauncher;
use crate::recorder::session::{ChannelSession, SessionConfig, SessionHandle};
use crate::recorder::ChannelState;
use crate::registry::{Channel, ChannelRegistry, RegistryError};

/// Extra time on top of the stop grace period before a session stop is
/// considered failed and escalated.
const STOP_MARGIN: Duration = Duration::from_secs(5);

/// Registry entry joined with its session's runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelOverview {
    #[serde(flatten)]
    pub channel: Channel,
    pub state: ChannelState,
}

/// Errors from the add-channel path.
#[derive(Debug, Error)]
pub enum AddChannelError {
    #[error("channel '{0}' does not exist on the platform")]
    UnknownChannel(String),

    #[error("could not verify channel '{id}': {source}")]
    Lookup { id: String, source: ProbeError },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

struct SessionEntry {
    handle: SessionHandle,
    task: JoinHandle<()>,
    token: CancellationToken,
}

/// Drives one `ChannelSession` per registered channel.
pub struct Scheduler {
    registry: Arc<ChannelRegistry>,
    prober: Arc<dyn StatusProber>,
    launcher: Arc<dyn ProcessLauncher>,
    hub: Arc<NotificationHub>,
    session_config: SessionConfig,
    cancel: CancellationToken,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        prober: Arc<dyn StatusProber>,
        launcher: Arc<dyn ProcessLauncher>,
        hub: Arc<NotificationHub>,
        session_config: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            prober,
            launcher,
            hub,
            session_config,
            cancel,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn sessions for every channel already in the registry.
    pub async fn start(&self) {
        let channels = self.registry.list().await;
        info!("starting scheduler with {} channel(s)", channels.len());

        let mut sessions = self.sessions.lock().await;
        for channel in channels {
            self.spawn_session_locked(&mut sessions, channel);
        }
    }

    /// Validate a channel id against the platform, register it, and start
    /// monitoring. The new session becomes eligible on its own first tick.
    pub async fn add_channel(&self, id: &str) -> Result<Channel, AddChannelError> {
        let info = self
            .prober
            .channel_info(id)
            .await
            .map_err(|source| AddChannelError::Lookup {
                id: id.to_string(),
                source,
            })?
            .ok_or_else(|| AddChannelError::UnknownChannel(id.to_string()))?;

        let channel = Channel::new(info.id, info.name);

        let mut sessions = self.sessions.lock().await;
        self.registry.add(channel.clone()).await?;
        self.spawn_session_locked(&mut sessions, channel.clone());
        drop(sessions);

        info!(channel = %channel.id, name = %channel.display_name, "channel added");
        Ok(channel)
    }

    /// Remove a channel, force-stopping its capture subprocess.
    ///
    /// Returns only after the capture process (if any) has terminated;
    /// the session's single `RecordingStopped` is emitted on the way.
    pub async fn remove_channel(&self, id: &str) -> Result<Channel, RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let removed = self.registry.remove(id).await?;
        let entry = sessions.remove(id);
        drop(sessions);

        if let Some(entry) = entry {
            let stop_timeout = self.session_config.stop_grace + STOP_MARGIN;
            if !entry.handle.stop(stop_timeout).await {
                warn!(channel = %id, "session did not acknowledge stop in time, cancelling");
                entry.token.cancel();
                entry.task.abort();
            }
            let _ = tokio::time::timeout(STOP_MARGIN, entry.task).await;
        }

        info!(channel = %id, "channel removed");
        Ok(removed)
    }

    /// Snapshot of registered channels with their current states.
    pub async fn list_channels(&self) -> Vec<ChannelOverview> {
        let channels = self.registry.list().await;

        let handles: HashMap<String, SessionHandle> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.handle.clone()))
                .collect()
        };

        let mut overview = Vec::with_capacity(channels.len());
        for channel in channels {
            let state = match handles.get(&channel.id) {
                Some(handle) => handle.state().await.unwrap_or(ChannelState::Idle),
                None => ChannelState::Idle,
            };
            overview.push(ChannelOverview { channel, state });
        }
        overview
    }

    /// Current state of one channel's session.
    pub async fn channel_state(&self, id: &str) -> Option<ChannelState> {
        let handle = {
            let sessions = self.sessions.lock().await;
            sessions.get(id).map(|entry| entry.handle.clone())
        };
        match handle {
            Some(handle) => handle.state().await,
            None => None,
        }
    }

    /// Stop the scheduler. With `stop_recordings` set, every active
    /// capture is terminated through the graceful-stop path first;
    /// otherwise captures are left to the launcher's detach policy.
    pub async fn shutdown(&self, stop_recordings: bool) {
        let entries: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, entry)| entry).collect()
        };

        if stop_recordings {
            let stop_timeout = self.session_config.stop_grace + STOP_MARGIN;
            let stops = entries
                .iter()
                .map(|entry| entry.handle.stop(stop_timeout));
            futures::future::join_all(stops).await;
        }

        self.cancel.cancel();

        for entry in entries {
            let _ = tokio::time::timeout(STOP_MARGIN, entry.task).await;
        }

        info!("scheduler stopped");
    }

    fn spawn_session_locked(
        &self,
        sessions: &mut HashMap<String, SessionEntry>,
        channel: Channel,
    ) {
        let id = channel.id.clone();
        if sessions.contains_key(&id) {
            warn!(channel = %id, "session already running");
            return;
        }

        let token = self.cancel.child_token();
        let (session, handle) = ChannelSession::new(
            channel,
            self.session_config.clone(),
            self.prober.clone(),
            self.launcher.clone(),
            self.hub.clone(),
            token.clone(),
        );
        let task = tokio::spawn(session.run());

        sessions.insert(
            id,
            SessionEntry {
                handle,
                task,
                token,
            },
        );
    }
}
