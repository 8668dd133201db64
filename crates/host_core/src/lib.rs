use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::Result;
use shared::{
    domain::{LocalIndex, MemberLifecycle, ParticipantKey, RequestLifecycle},
    error::CommandError,
    protocol::{
        ChannelEvent, CommandAction, CommandBody, WireMember, WireParticipant,
        DEFAULT_DISPLAY_NAME,
    },
};
use storage::SettingsStore;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub mod gateway;
pub mod room_identity;
pub mod transport;

pub use gateway::{CommandTransport, HttpCommandTransport};

/// Settings key holding the persisted whitelist as a JSON array of
/// participant keys.
pub const WHITELIST_SETTINGS_KEY: &str = "whitelist";

const DEFAULT_AUTO_ACCEPT_DELAY: Duration = Duration::from_secs(1);
const ENGINE_EVENT_CAPACITY: usize = 256;

/// An unresolved ask by a participant to join the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub local_index: LocalIndex,
    pub key: ParticipantKey,
    pub display_name: String,
    pub whitelisted: bool,
    pub lifecycle: RequestLifecycle,
}

/// An accepted participant, potentially control-enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedParticipant {
    pub local_index: LocalIndex,
    pub key: ParticipantKey,
    pub display_name: String,
    pub control_enabled: bool,
    pub whitelisted: bool,
    pub lifecycle: MemberLifecycle,
}

/// Engine notifications for the presentation layer. Every payload is an
/// owned clone, so subscribers render from immutable snapshots instead of
/// holding their own copies of the model.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    RequestsChanged(Vec<PendingRequest>),
    RosterChanged(Vec<AcceptedParticipant>),
    /// A pending request left the queue through a confirmed accept or
    /// reject; the carried entry is in the `Resolving` state.
    RequestResolved {
        request: PendingRequest,
        accepted: bool,
    },
    /// A roster entry left through a confirmed remove; the carried entry is
    /// in the `Removing` state.
    ParticipantRemoved { participant: AcceptedParticipant },
    LogsReplaced(Vec<String>),
    LogAppended(String),
    CommandFailed {
        key: ParticipantKey,
        action: CommandAction,
        message: String,
    },
    Error(String),
}

/// Request/roster synchronization engine.
///
/// All model mutations happen inside short critical sections on one mutex;
/// network awaits never hold it, so the caller can keep issuing commands for
/// unrelated entities while one is in flight. Channel events are applied by
/// a single listener task in strict arrival order.
pub struct RoomEngine {
    transport: Arc<dyn CommandTransport>,
    settings: Arc<dyn SettingsStore>,
    inner: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    auto_accept_delay: Duration,
}

struct EngineState {
    next_local_index: u64,
    pending: Vec<PendingRequest>,
    roster: Vec<AcceptedParticipant>,
    // Display-only and unbounded, reproducing the source system; the server
    // replaces the whole sequence on every snapshot.
    logs: Vec<String>,
    whitelist: HashSet<String>,
    auto_accept_timers: HashMap<String, JoinHandle<()>>,
}

impl EngineState {
    fn allocate_local_index(&mut self) -> LocalIndex {
        let index = LocalIndex(self.next_local_index);
        self.next_local_index += 1;
        index
    }
}

impl RoomEngine {
    pub async fn start(
        transport: Arc<dyn CommandTransport>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Arc<Self>> {
        Self::start_with_auto_accept_delay(transport, settings, DEFAULT_AUTO_ACCEPT_DELAY).await
    }

    pub async fn start_with_auto_accept_delay(
        transport: Arc<dyn CommandTransport>,
        settings: Arc<dyn SettingsStore>,
        auto_accept_delay: Duration,
    ) -> Result<Arc<Self>> {
        let whitelist = load_whitelist(settings.as_ref()).await?;
        let (events, _) = broadcast::channel(ENGINE_EVENT_CAPACITY);
        Ok(Arc::new(Self {
            transport,
            settings,
            inner: Mutex::new(EngineState {
                next_local_index: 0,
                pending: Vec::new(),
                roster: Vec::new(),
                logs: Vec::new(),
                whitelist,
                auto_accept_timers: HashMap::new(),
            }),
            events,
            auto_accept_delay,
        }))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub async fn pending_requests(&self) -> Vec<PendingRequest> {
        self.inner.lock().await.pending.clone()
    }

    pub async fn roster(&self) -> Vec<AcceptedParticipant> {
        self.inner.lock().await.roster.clone()
    }

    pub async fn logs(&self) -> Vec<String> {
        self.inner.lock().await.logs.clone()
    }

    /// Cancels every outstanding auto-accept timer. Part of session
    /// teardown; the engine keeps no other background work of its own.
    pub async fn shutdown(&self) {
        let mut state = self.inner.lock().await;
        for (_, timer) in state.auto_accept_timers.drain() {
            timer.abort();
        }
    }

    /// Applies one channel event. Must be called in arrival order; the
    /// listener task in [`transport`] does exactly that.
    pub async fn apply_event(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::Snapshot {
                requests,
                allowed,
                logs,
            } => self.apply_snapshot(requests, allowed, logs).await,
            ChannelEvent::Insert { user } => self.apply_insert(user).await,
            ChannelEvent::Log { message } => self.apply_log(message).await,
        }
    }

    async fn apply_snapshot(
        self: &Arc<Self>,
        requests: Vec<WireParticipant>,
        allowed: Vec<WireMember>,
        logs: Vec<String>,
    ) {
        let (pending_snapshot, roster_snapshot, logs_snapshot) = {
            let mut state = self.inner.lock().await;
            for (_, timer) in state.auto_accept_timers.drain() {
                timer.abort();
            }
            state.pending.clear();
            state.roster.clear();

            // A key may appear in at most one of the two collections; the
            // snapshot is authoritative, so later duplicates lose.
            let mut seen = HashSet::new();
            for wire in requests {
                let (key, display_name) = normalized_identity(wire.name, wire.key);
                if key.is_actionable() && !seen.insert(key.0.clone()) {
                    continue;
                }
                let whitelisted =
                    state.whitelist.contains(key.as_str()) || wire.whitelisted.unwrap_or(false);
                let local_index = state.allocate_local_index();
                state.pending.push(PendingRequest {
                    local_index,
                    key,
                    display_name,
                    whitelisted,
                    lifecycle: RequestLifecycle::Queued,
                });
            }
            for wire in allowed {
                let (key, display_name) = normalized_identity(wire.name, wire.key);
                if key.is_actionable() && !seen.insert(key.0.clone()) {
                    continue;
                }
                let whitelisted =
                    state.whitelist.contains(key.as_str()) || wire.whitelisted.unwrap_or(false);
                let local_index = state.allocate_local_index();
                state.roster.push(AcceptedParticipant {
                    local_index,
                    key,
                    display_name,
                    control_enabled: wire.can_control.unwrap_or(false),
                    whitelisted,
                    lifecycle: MemberLifecycle::Active,
                });
            }
            state.logs = logs;
            self.schedule_auto_accepts(&mut state);
            (
                state.pending.clone(),
                state.roster.clone(),
                state.logs.clone(),
            )
        };
        info!(
            pending = pending_snapshot.len(),
            roster = roster_snapshot.len(),
            "channel: snapshot applied"
        );
        let _ = self
            .events
            .send(EngineEvent::RequestsChanged(pending_snapshot));
        let _ = self.events.send(EngineEvent::RosterChanged(roster_snapshot));
        let _ = self.events.send(EngineEvent::LogsReplaced(logs_snapshot));
    }

    async fn apply_insert(self: &Arc<Self>, user: WireParticipant) {
        let pending_snapshot = {
            let mut state = self.inner.lock().await;
            let (key, display_name) = normalized_identity(user.name, user.key);
            if key.is_actionable() {
                if state.pending.iter().any(|request| request.key == key) {
                    debug!(key = %key, "channel: duplicate insert ignored");
                    return;
                }
                if state.roster.iter().any(|member| member.key == key) {
                    debug!(key = %key, "channel: insert for roster member ignored");
                    return;
                }
            }
            let whitelisted =
                state.whitelist.contains(key.as_str()) || user.whitelisted.unwrap_or(false);
            let local_index = state.allocate_local_index();
            state.pending.push(PendingRequest {
                local_index,
                key,
                display_name,
                whitelisted,
                lifecycle: RequestLifecycle::Entering,
            });
            self.schedule_auto_accepts(&mut state);
            state.pending.clone()
        };
        let _ = self
            .events
            .send(EngineEvent::RequestsChanged(pending_snapshot));
    }

    async fn apply_log(&self, message: String) {
        {
            let mut state = self.inner.lock().await;
            state.logs.push(message.clone());
        }
        let _ = self.events.send(EngineEvent::LogAppended(message));
    }

    /// Presentation hook: the settle window after an entry appears has
    /// elapsed. `Entering` flips to `Queued`/`Active`; no semantic effect.
    pub async fn mark_settled(&self, key: &ParticipantKey) {
        let (pending_snapshot, roster_snapshot) = {
            let mut state = self.inner.lock().await;
            let mut pending_changed = false;
            let mut roster_changed = false;
            if let Some(request) = state.pending.iter_mut().find(|request| &request.key == key) {
                if request.lifecycle == RequestLifecycle::Entering {
                    request.lifecycle = RequestLifecycle::Queued;
                    pending_changed = true;
                }
            }
            if let Some(member) = state.roster.iter_mut().find(|member| &member.key == key) {
                if member.lifecycle == MemberLifecycle::Entering {
                    member.lifecycle = MemberLifecycle::Active;
                    roster_changed = true;
                }
            }
            (
                pending_changed.then(|| state.pending.clone()),
                roster_changed.then(|| state.roster.clone()),
            )
        };
        if let Some(snapshot) = pending_snapshot {
            let _ = self.events.send(EngineEvent::RequestsChanged(snapshot));
        }
        if let Some(snapshot) = roster_snapshot {
            let _ = self.events.send(EngineEvent::RosterChanged(snapshot));
        }
    }

    /// Confirms a pending request. On success the entry leaves the queue
    /// through `Resolving` and joins the roster with control enabled and
    /// its whitelist flag carried over.
    pub async fn accept(&self, key: &ParticipantKey) -> Result<bool, CommandError> {
        if !key.is_actionable() {
            return Ok(false);
        }
        let request = {
            let state = self.inner.lock().await;
            match state.pending.iter().find(|request| &request.key == key) {
                Some(request) => request.clone(),
                None => return Ok(false),
            }
        };

        let body = CommandBody {
            action: CommandAction::Accept,
            whitelisted: Some(request.whitelisted),
        };
        if let Err(err) = self.transport.send(key, &body).await {
            self.report_command_failure(key, CommandAction::Accept, &err);
            return Err(err);
        }

        let (resolved, pending_snapshot, roster_snapshot) = {
            let mut state = self.inner.lock().await;
            if let Some(timer) = state.auto_accept_timers.remove(key.as_str()) {
                timer.abort();
            }
            // A snapshot may have replaced the queue while the command was
            // in flight; the confirmed result is still applied on top and
            // may reintroduce the entry until the next snapshot.
            let mut resolved = match state.pending.iter().position(|r| &r.key == key) {
                Some(index) => state.pending.remove(index),
                None => request,
            };
            resolved.lifecycle = RequestLifecycle::Resolving;
            if !state.roster.iter().any(|member| member.key == resolved.key) {
                let local_index = state.allocate_local_index();
                state.roster.push(AcceptedParticipant {
                    local_index,
                    key: resolved.key.clone(),
                    display_name: resolved.display_name.clone(),
                    control_enabled: true,
                    whitelisted: resolved.whitelisted,
                    lifecycle: MemberLifecycle::Entering,
                });
            }
            (resolved, state.pending.clone(), state.roster.clone())
        };
        info!(key = %key, "gateway: accept confirmed");
        let _ = self.events.send(EngineEvent::RequestResolved {
            request: resolved,
            accepted: true,
        });
        let _ = self
            .events
            .send(EngineEvent::RequestsChanged(pending_snapshot));
        let _ = self.events.send(EngineEvent::RosterChanged(roster_snapshot));
        Ok(true)
    }

    /// Denies a pending request. On success the entry leaves the queue
    /// through `Resolving`; no roster entry is created.
    pub async fn reject(&self, key: &ParticipantKey) -> Result<bool, CommandError> {
        if !key.is_actionable() {
            return Ok(false);
        }
        {
            let state = self.inner.lock().await;
            if !state.pending.iter().any(|request| &request.key == key) {
                return Ok(false);
            }
        }

        let body = CommandBody::plain(CommandAction::Reject);
        if let Err(err) = self.transport.send(key, &body).await {
            self.report_command_failure(key, CommandAction::Reject, &err);
            return Err(err);
        }

        let (resolved, pending_snapshot) = {
            let mut state = self.inner.lock().await;
            if let Some(timer) = state.auto_accept_timers.remove(key.as_str()) {
                timer.abort();
            }
            let resolved = state
                .pending
                .iter()
                .position(|request| &request.key == key)
                .map(|index| {
                    let mut request = state.pending.remove(index);
                    request.lifecycle = RequestLifecycle::Resolving;
                    request
                });
            (resolved, state.pending.clone())
        };
        info!(key = %key, "gateway: reject confirmed");
        if let Some(request) = resolved {
            let _ = self.events.send(EngineEvent::RequestResolved {
                request,
                accepted: false,
            });
        }
        let _ = self
            .events
            .send(EngineEvent::RequestsChanged(pending_snapshot));
        Ok(true)
    }

    /// Removes an accepted participant from the roster.
    pub async fn remove(&self, key: &ParticipantKey) -> Result<bool, CommandError> {
        if !key.is_actionable() {
            return Ok(false);
        }
        {
            let state = self.inner.lock().await;
            if !state.roster.iter().any(|member| &member.key == key) {
                return Ok(false);
            }
        }

        let body = CommandBody::plain(CommandAction::Remove);
        if let Err(err) = self.transport.send(key, &body).await {
            self.report_command_failure(key, CommandAction::Remove, &err);
            return Err(err);
        }

        let (removed, roster_snapshot) = {
            let mut state = self.inner.lock().await;
            let removed = state
                .roster
                .iter()
                .position(|member| &member.key == key)
                .map(|index| {
                    let mut member = state.roster.remove(index);
                    member.lifecycle = MemberLifecycle::Removing;
                    member
                });
            (removed, state.roster.clone())
        };
        info!(key = %key, "gateway: remove confirmed");
        if let Some(participant) = removed {
            let _ = self
                .events
                .send(EngineEvent::ParticipantRemoved { participant });
        }
        let _ = self.events.send(EngineEvent::RosterChanged(roster_snapshot));
        Ok(true)
    }

    /// Adds or removes the participant key in the local whitelist and tells
    /// the server. The persisted set is written before the command is
    /// confirmed and is not rolled back on failure, matching the source
    /// system; the roster flag only flips after confirmation.
    pub async fn set_whitelist(
        &self,
        key: &ParticipantKey,
        desired: bool,
    ) -> Result<bool, CommandError> {
        if !key.is_actionable() {
            return Ok(false);
        }
        let whitelist_json = {
            let mut state = self.inner.lock().await;
            if !state.roster.iter().any(|member| &member.key == key) {
                return Ok(false);
            }
            if desired {
                state.whitelist.insert(key.0.clone());
            } else {
                state.whitelist.remove(key.as_str());
            }
            whitelist_json(&state.whitelist)
        };
        if let Err(err) = self.settings.set(WHITELIST_SETTINGS_KEY, &whitelist_json).await {
            warn!(key = %key, "settings: whitelist persist failed: {err}");
        }

        let action = if desired {
            CommandAction::Whitelist
        } else {
            CommandAction::RemoveWhitelist
        };
        if let Err(err) = self.transport.send(key, &CommandBody::plain(action)).await {
            self.report_command_failure(key, action, &err);
            return Err(err);
        }

        let roster_snapshot = {
            let mut state = self.inner.lock().await;
            if let Some(member) = state.roster.iter_mut().find(|member| &member.key == key) {
                member.whitelisted = desired;
            }
            state.roster.clone()
        };
        info!(key = %key, desired, "gateway: whitelist toggle confirmed");
        let _ = self.events.send(EngineEvent::RosterChanged(roster_snapshot));
        Ok(true)
    }

    /// Grants or revokes room control for an accepted participant.
    pub async fn set_control_enabled(
        &self,
        key: &ParticipantKey,
        desired: bool,
    ) -> Result<bool, CommandError> {
        if !key.is_actionable() {
            return Ok(false);
        }
        {
            let state = self.inner.lock().await;
            if !state.roster.iter().any(|member| &member.key == key) {
                return Ok(false);
            }
        }

        let action = if desired {
            CommandAction::Enable
        } else {
            CommandAction::Disable
        };
        if let Err(err) = self.transport.send(key, &CommandBody::plain(action)).await {
            self.report_command_failure(key, action, &err);
            return Err(err);
        }

        let roster_snapshot = {
            let mut state = self.inner.lock().await;
            if let Some(member) = state.roster.iter_mut().find(|member| &member.key == key) {
                member.control_enabled = desired;
            }
            state.roster.clone()
        };
        info!(key = %key, desired, "gateway: control toggle confirmed");
        let _ = self.events.send(EngineEvent::RosterChanged(roster_snapshot));
        Ok(true)
    }

    /// Schedules one auto-accept timer per qualifying pending request.
    /// Called after every change to the request queue while the state lock
    /// is held; spawned timers block on the same lock until it is released.
    fn schedule_auto_accepts(self: &Arc<Self>, state: &mut EngineState) {
        let delay = self.auto_accept_delay;
        let EngineState {
            pending,
            auto_accept_timers,
            ..
        } = state;
        for request in pending.iter() {
            if !request.whitelisted || request.lifecycle == RequestLifecycle::Resolving {
                continue;
            }
            // Un-actionable entries would only produce guarded no-ops.
            if !request.key.is_actionable() {
                continue;
            }
            if auto_accept_timers.contains_key(request.key.as_str()) {
                continue;
            }
            let engine = Arc::clone(self);
            let key = request.key.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                engine
                    .inner
                    .lock()
                    .await
                    .auto_accept_timers
                    .remove(key.as_str());
                match engine.accept(&key).await {
                    Ok(true) => info!(key = %key, "whitelist: auto-accept confirmed"),
                    Ok(false) => debug!(key = %key, "whitelist: auto-accept target already resolved"),
                    Err(err) => warn!(key = %key, "whitelist: auto-accept failed: {err}"),
                }
            });
            auto_accept_timers.insert(request.key.0.clone(), handle);
        }
    }

    fn report_command_failure(&self, key: &ParticipantKey, action: CommandAction, err: &CommandError) {
        warn!(key = %key, action = ?action, "gateway: command failed: {err}");
        let _ = self.events.send(EngineEvent::CommandFailed {
            key: key.clone(),
            action,
            message: err.to_string(),
        });
    }

    pub(crate) fn emit_error(&self, message: String) {
        let _ = self.events.send(EngineEvent::Error(message));
    }
}

fn normalized_identity(name: Option<String>, key: Option<String>) -> (ParticipantKey, String) {
    let display_name = match name {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_DISPLAY_NAME.to_string(),
    };
    (ParticipantKey(key.unwrap_or_default()), display_name)
}

fn whitelist_json(whitelist: &HashSet<String>) -> String {
    let mut keys: Vec<&String> = whitelist.iter().collect();
    keys.sort();
    serde_json::to_string(&keys).unwrap_or_else(|_| "[]".to_string())
}

async fn load_whitelist(settings: &dyn SettingsStore) -> Result<HashSet<String>> {
    let Some(raw) = settings.get(WHITELIST_SETTINGS_KEY).await? else {
        return Ok(HashSet::new());
    };
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(keys) => Ok(keys.into_iter().collect()),
        Err(err) => {
            warn!("settings: unreadable whitelist value, starting empty: {err}");
            Ok(HashSet::new())
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
