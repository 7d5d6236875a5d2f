//! [`IdleManager`] – gates autonomous idle motions on the orchestrator's
//! status and serves the operator command vocabulary.
//!
//! Once per period [`IdleManager::update`] asks the orchestrator for its
//! status token:
//!
//! | Orchestrator answer | Gate |
//! |---|---|
//! | not present | unchanged |
//! | unreachable | forbid |
//! | `idle` | permit |
//! | anything else | forbid |
//!
//! While the gate stays open, every `motion_every` consecutive permitted
//! periods the polling thread performs the next motion on its own. A closed
//! gate resets the count.
//!
//! Operator commands (`help`, `move [index]`, `dontMove`, `okMove`) go
//! through [`IdleManager::respond`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use pointreach_types::ReachError;
use tracing::{debug, info, warn};

use crate::idle_motions::IdleMotions;

/// Default polling period.
pub const DEFAULT_IDLE_PERIOD: Duration = Duration::from_millis(500);

/// Default number of permitted periods between autonomous motions.
pub const DEFAULT_MOTION_EVERY: u32 = 10;

/// The token that permits motion.
pub const IDLE_TOKEN: &str = "idle";

const HELP_LINES: [&str; 5] = [
    "help : gets this list",
    "move : executes the next motion",
    "move <int> : executes the motion defined",
    "dontMove : the robot cannot execute motions autonomously",
    "okMove : the robot can execute motions autonomously",
];

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator status
// ────────────────────────────────────────────────────────────────────────────

/// Request/response channel to the task orchestrator.
pub trait OrchestratorStatus: Send + Sync {
    /// - `Ok(None)` – no orchestrator is running.
    /// - `Ok(Some(token))` – its current status token.
    /// - `Err(_)` – it exists but could not be reached.
    fn status(&self) -> Result<Option<String>, ReachError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Commands and replies
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleCommand {
    Help,
    /// `None` picks the next motion in turn.
    Move(Option<usize>),
    DontMove,
    OkMove,
    Unknown(String),
}

impl IdleCommand {
    /// Parse one command line. A negative motion index means "next".
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let cmd = words.next().unwrap_or("");
        let arg = words.next();
        match (cmd, arg) {
            ("help", _) => Self::Help,
            ("dontMove", _) => Self::DontMove,
            ("okMove", _) => Self::OkMove,
            ("move", None) => Self::Move(None),
            ("move", Some(arg)) => match arg.parse::<i64>() {
                Ok(i) if i < 0 => Self::Move(None),
                Ok(i) => usize::try_from(i).map_or_else(|_| Self::Unknown(line.to_string()), |i| Self::Move(Some(i))),
                Err(_) => Self::Unknown(line.to_string()),
            },
            _ => Self::Unknown(line.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleReply {
    Ack,
    Nack,
    Help(Vec<String>),
    /// The command was understood but failed.
    Error(String),
}

impl fmt::Display for IdleReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack => f.write_str("ack"),
            Self::Nack => f.write_str("nack"),
            Self::Help(lines) => {
                f.write_str("many")?;
                for line in lines {
                    write!(f, "\n{line}")?;
                }
                Ok(())
            }
            Self::Error(_) => f.write_str("Error"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// IdleManager
// ────────────────────────────────────────────────────────────────────────────

pub struct IdleManager {
    motions: Mutex<IdleMotions>,
    orchestrator: Box<dyn OrchestratorStatus>,
    period: Duration,
    /// `0` disables autonomous motions.
    motion_every: u32,
    permitted_periods: AtomicU32,
}

impl IdleManager {
    pub fn new(motions: IdleMotions, orchestrator: Box<dyn OrchestratorStatus>, period: Duration) -> Self {
        Self {
            motions: Mutex::new(motions),
            orchestrator,
            period,
            motion_every: DEFAULT_MOTION_EVERY,
            permitted_periods: AtomicU32::new(0),
        }
    }

    /// Perform an autonomous motion every `periods` permitted periods.
    /// `0` leaves motions to the operator.
    pub fn with_motion_every(mut self, periods: u32) -> Self {
        self.motion_every = periods;
        self
    }

    pub fn motion_every(&self) -> u32 {
        self.motion_every
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn may_move(&self) -> bool {
        self.motions().may_move()
    }

    /// Poll the orchestrator once and set the gate accordingly.
    ///
    /// The orchestrator is queried without holding the motion lock.
    pub fn update(&self) {
        match self.orchestrator.status() {
            Ok(None) => debug!("no orchestrator present; idle gate unchanged"),
            Ok(Some(token)) if token.trim() == IDLE_TOKEN => self.motions().now_you_can_move(),
            Ok(Some(token)) => {
                debug!(status = %token.trim(), "orchestrator busy");
                self.motions().dont_move();
            }
            Err(e) => {
                warn!(error = %e, "orchestrator unreachable; forbidding idle motions");
                self.motions().dont_move();
            }
        }
    }

    /// One polling period: refresh the gate, then perform the next motion
    /// if the gate has been open for `motion_every` periods in a row.
    ///
    /// Returns the index of the motion performed, if any.
    pub fn poll(&self) -> Option<usize> {
        self.update();
        if self.motion_every == 0 {
            return None;
        }

        let mut motions = self.motions();
        if !motions.may_move() {
            self.permitted_periods.store(0, Ordering::SeqCst);
            return None;
        }
        let streak = self.permitted_periods.fetch_add(1, Ordering::SeqCst) + 1;
        if streak < self.motion_every {
            return None;
        }
        self.permitted_periods.store(0, Ordering::SeqCst);
        match motions.do_motion(None) {
            Ok(index) => Some(index),
            Err(e) => {
                debug!(error = %e, "no autonomous idle motion");
                None
            }
        }
    }

    /// Handle one operator command line.
    pub fn respond(&self, line: &str) -> IdleReply {
        info!(request = %line.trim(), "idle command received");
        match IdleCommand::parse(line) {
            IdleCommand::Help => IdleReply::Help(HELP_LINES.iter().map(|l| l.to_string()).collect()),
            IdleCommand::DontMove => {
                self.motions().dont_move();
                IdleReply::Ack
            }
            IdleCommand::OkMove => {
                self.motions().now_you_can_move();
                IdleReply::Ack
            }
            IdleCommand::Move(index) => match self.motions().do_motion(index) {
                Ok(_) => IdleReply::Ack,
                Err(e) => {
                    warn!(error = %e, "idle motion refused");
                    IdleReply::Error(e.to_string())
                }
            },
            IdleCommand::Unknown(_) => {
                warn!("wrong idle command; type 'help'");
                IdleReply::Nack
            }
        }
    }

    /// Run [`poll`][Self::poll] every period on a dedicated thread until
    /// `shutdown` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Startup`] if the thread cannot be spawned.
    pub fn spawn_polling(self: Arc<Self>, shutdown: Arc<AtomicBool>) -> Result<JoinHandle<()>, ReachError> {
        std::thread::Builder::new()
            .name("idle-manager".to_string())
            .spawn(move || {
                info!(
                    period_ms = self.period.as_millis() as u64,
                    motion_every = self.motion_every,
                    "idle manager polling"
                );
                while !shutdown.load(Ordering::SeqCst) {
                    self.poll();
                    std::thread::sleep(self.period);
                }
                debug!("idle manager stopped");
            })
            .map_err(|e| ReachError::Startup(format!("failed to spawn idle manager thread: {e}")))
    }

    fn motions(&self) -> MutexGuard<'_, IdleMotions> {
        self.motions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
