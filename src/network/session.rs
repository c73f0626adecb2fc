//! Handshake Session
//!
//! Wires one local peer's state machine to its collaborators and drives it:
//! readiness wait at startup, roster polling, ticking, restart.
//!
//! A session built without a required collaborator does not fail the
//! host application. The problem is logged once and the handshake feature
//! stays disabled for the lifetime of the session.

use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, instrument, warn};

use crate::config::{ConfigError, HandshakeConfig};
use crate::core::clock::TickContext;
use crate::handshake::directory::{DirectoryEvent, PeerDirectory, RosterSource};
use crate::handshake::effects::EffectDispatcher;
use crate::handshake::machine::{HandshakeStateMachine, PoseSource, SetupError, TickOutcome};
use crate::handshake::peer::{GameMode, PeerId, PeerRole, PeerView};
use crate::handshake::replicated::FieldUpdate;

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Boxed dispatcher as held by a session.
pub type BoxedDispatcher = Box<dyn EffectDispatcher + Send>;

/// Boxed pose source as held by a session.
pub type BoxedPoseSource = Box<dyn PoseSource + Send>;

/// State machine with boxed collaborators.
pub type SessionMachine = HandshakeStateMachine<BoxedDispatcher, BoxedPoseSource>;

/// Startup readiness wait failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadinessError {
    /// Local peer never became active.
    #[error("Local peer not ready after {0:?}")]
    TimedOut(Duration),
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Handshake feature disabled at setup.
    #[error("Handshake feature is disabled")]
    Disabled,

    /// Readiness wait failed.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    /// Readiness timing could not be turned into durations.
    #[error("{0}")]
    Config(String),
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, no game assigned.
    Idle,
    /// Game mode and role assigned; ticking.
    Running,
    /// Feature disabled at setup.
    Disabled,
}

/// Whether the handshake runs in this session.
pub enum HandshakeFeature {
    /// Fully wired.
    Enabled(Box<SessionMachine>),
    /// Setup failed; the reason was logged once.
    Disabled(String),
}

/// Reports whether the local peer object is active.
pub trait ReadinessProbe {
    /// True once the local peer can be ticked.
    fn is_ready(&self) -> bool;
}

impl<F: Fn() -> bool> ReadinessProbe for F {
    fn is_ready(&self) -> bool {
        self()
    }
}

/// Poll `probe` every `interval` until it reports ready or `limit` passes.
pub async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    limit: Duration,
    interval: Duration,
) -> Result<(), ReadinessError> {
    let poll = async {
        while !probe.is_ready() {
            sleep(interval).await;
        }
    };
    timeout(limit, poll)
        .await
        .map_err(|_| ReadinessError::TimedOut(limit))
}

/// One session tick.
#[derive(Debug, Default)]
pub struct SessionTick {
    /// Roster changes seen this tick
    pub roster: Vec<DirectoryEvent>,
    /// State machine result
    pub outcome: TickOutcome,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Collects collaborators for a `HandshakeSession`.
pub struct SessionBuilder {
    local: PeerId,
    config: HandshakeConfig,
    session_id: Option<SessionId>,
    dispatcher: Option<BoxedDispatcher>,
    pose_source: Option<BoxedPoseSource>,
}

impl SessionBuilder {
    /// Start a builder for the local peer.
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            config: HandshakeConfig::default(),
            session_id: None,
            dispatcher: None,
            pose_source: None,
        }
    }

    /// Use a specific configuration.
    pub fn config(mut self, config: HandshakeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a fixed session id instead of a random one.
    pub fn session_id(mut self, id: SessionId) -> Self {
        self.session_id = Some(id);
        self
    }

    /// Effect dispatcher (required).
    pub fn dispatcher(mut self, dispatcher: impl EffectDispatcher + Send + 'static) -> Self {
        self.dispatcher = Some(Box::new(dispatcher));
        self
    }

    /// Pose source (required).
    pub fn pose_source(mut self, pose_source: impl PoseSource + Send + 'static) -> Self {
        self.pose_source = Some(Box::new(pose_source));
        self
    }

    /// Build, failing on any missing or invalid collaborator.
    pub fn build(self) -> Result<HandshakeSession, SetupError> {
        let id = self.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().into_bytes());
        let dispatcher = self
            .dispatcher
            .ok_or(SetupError::MissingCollaborator("effect dispatcher"))?;
        let pose_source = self
            .pose_source
            .ok_or(SetupError::MissingCollaborator("pose source"))?;
        let machine = HandshakeStateMachine::new(self.local, self.config, dispatcher, pose_source)?;

        Ok(HandshakeSession {
            id,
            local: self.local,
            feature: HandshakeFeature::Enabled(Box::new(machine)),
            directory: PeerDirectory::new(),
            state: SessionState::Idle,
        })
    }

    /// Build, disabling the feature instead of failing.
    pub fn build_or_disable(self) -> HandshakeSession {
        let local = self.local;
        let id = self.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().into_bytes());
        match self.build() {
            Ok(session) => session,
            Err(e) => {
                error!("Handshake disabled for {}: {}", local, e);
                HandshakeSession {
                    id,
                    local,
                    feature: HandshakeFeature::Disabled(e.to_string()),
                    directory: PeerDirectory::new(),
                    state: SessionState::Disabled,
                }
            }
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// A local peer's handshake session.
pub struct HandshakeSession {
    id: SessionId,
    local: PeerId,
    feature: HandshakeFeature,
    directory: PeerDirectory,
    state: SessionState,
}

impl HandshakeSession {
    /// Builder for the local peer.
    pub fn builder(local: PeerId) -> SessionBuilder {
        SessionBuilder::new(local)
    }

    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Local peer id.
    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the handshake feature is wired.
    pub fn is_enabled(&self) -> bool {
        matches!(self.feature, HandshakeFeature::Enabled(_))
    }

    /// Reason the feature is disabled, if it is.
    pub fn disabled_reason(&self) -> Option<&str> {
        match &self.feature {
            HandshakeFeature::Disabled(reason) => Some(reason.as_str()),
            HandshakeFeature::Enabled(_) => None,
        }
    }

    /// The state machine, if enabled.
    pub fn machine(&self) -> Option<&SessionMachine> {
        match &self.feature {
            HandshakeFeature::Enabled(machine) => Some(&**machine),
            HandshakeFeature::Disabled(_) => None,
        }
    }

    fn machine_mut(&mut self) -> Option<&mut SessionMachine> {
        match &mut self.feature {
            HandshakeFeature::Enabled(machine) => Some(&mut **machine),
            HandshakeFeature::Disabled(_) => None,
        }
    }

    /// Current roster.
    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    /// The local peer as other peers would see it.
    pub fn local_view(&self) -> Option<PeerView> {
        self.machine().map(|m| m.local_view())
    }

    /// Wait for the local peer, then assign mode and role.
    #[instrument(skip(self, probe, ctx), fields(session = %hex::encode(self.id)))]
    pub async fn start(
        &mut self,
        mode: GameMode,
        role: PeerRole,
        probe: &dyn ReadinessProbe,
        ctx: &TickContext,
    ) -> Result<(), SessionError> {
        let cfg = match self.machine() {
            Some(machine) => machine.config(),
            None => return Err(SessionError::Disabled),
        };
        let invalid = |e: ConfigError| SessionError::Config(e.to_string());
        let limit = cfg.readiness_timeout().map_err(invalid)?;
        let interval = cfg.readiness_poll_interval().map_err(invalid)?;

        if let Err(e) = wait_until_ready(probe, limit, interval).await {
            warn!("{}: {}", self.local, e);
            return Err(e.into());
        }

        if let Some(machine) = self.machine_mut() {
            machine.start(mode, role, ctx);
        }
        self.state = SessionState::Running;
        info!("Session running for {}", self.local);
        Ok(())
    }

    /// Poll the roster (networked games only) and tick the machine.
    ///
    /// Returns None when the feature is disabled.
    pub fn tick(&mut self, roster: &dyn RosterSource, ctx: &TickContext) -> Option<SessionTick> {
        let networked = self.machine()?.mode().is_networked();
        let events = if networked {
            self.directory.poll(roster)
        } else {
            Vec::new()
        };

        let directory = &self.directory;
        let machine = match &mut self.feature {
            HandshakeFeature::Enabled(machine) => machine,
            HandshakeFeature::Disabled(_) => return None,
        };

        // Newcomers have not seen any of our earlier deltas
        if events.iter().any(|e| matches!(e, DirectoryEvent::Joined(id) if *id != self.local)) {
            machine.queue_full_state(ctx.tick);
        }

        let outcome = machine.tick(ctx, directory);
        Some(SessionTick { roster: events, outcome })
    }

    /// Drop the game mode; any handshake in progress aborts on the next tick.
    pub fn reset_role(&mut self) {
        if let Some(machine) = self.machine_mut() {
            machine.reset_assignment();
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Idle;
        }
    }

    /// Return to the initial state: no assignment, empty roster, initial fields.
    pub fn restart(&mut self, tick: u64) {
        if let Some(machine) = self.machine_mut() {
            machine.reset_all(tick);
        }
        self.directory.reset();
        if self.state == SessionState::Running {
            self.state = SessionState::Idle;
        }
        info!("Session restarted for {}", self.local);
    }

    /// Queue every owned field again for the transport.
    pub fn queue_full_state(&mut self, tick: u64) {
        if let Some(machine) = self.machine_mut() {
            machine.queue_full_state(tick);
        }
    }

    /// Pending replicated field updates.
    pub fn take_outbox(&mut self) -> Vec<FieldUpdate> {
        self.machine_mut().map(|m| m.take_outbox()).unwrap_or_default()
    }
}
