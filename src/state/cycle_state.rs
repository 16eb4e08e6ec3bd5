/// Sync cycle state definitions
///
/// A driver moves `Idle -> Running -> (Success | PartialFailure | Fatal) -> Idle`.
use std::fmt;

/// Represents the current state of a sync driver's cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CycleState {
    /// Waiting for the next scheduled tick
    #[default]
    Idle,

    /// Work items are being dispatched
    Running,

    // ===== Terminal States =====
    /// Every item completed without a surfaced error
    Success,

    /// Some items exhausted their retry budget
    PartialFailure,

    /// A setup error aborted the cycle before any watermark moved
    Fatal,
}

impl CycleState {
    /// Returns true if this is one of the three terminal cycle outcomes
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::PartialFailure | Self::Fatal)
    }

    /// Checks whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: CycleState) -> bool {
        match self {
            Self::Idle => next == Self::Running,
            Self::Running => next.is_terminal(),
            Self::Success | Self::PartialFailure | Self::Fatal => next == Self::Idle,
        }
    }

    /// Converts the cycle state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Fatal => "fatal",
        }
    }

    /// Parses a cycle state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "partial_failure" => Some(Self::PartialFailure),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
