// =============================================================================
// Shared types used across the Helios signal relay
// =============================================================================

use serde::{Deserialize, Serialize};

/// Direction of an open (or requested) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The opposing position side.
    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Exchange order side that opens or adds to this position.
    pub fn entry_order_side(self) -> &'static str {
        match self {
            Self::Long => "BUY",
            Self::Short => "SELL",
        }
    }

    /// Exchange order side that reduces or closes this position.
    pub fn exit_order_side(self) -> &'static str {
        match self {
            Self::Long => "SELL",
            Self::Short => "BUY",
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Category of an incoming webhook alert after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    /// A confirmation alert that requests a new position (or SL/TP refresh).
    PositionTrigger,
    /// An exit alert for an existing position.
    PositionExit,
    /// A take-profit level was reached on the charting side.
    TpReach,
    /// A stop-loss level was reached on the charting side.
    SlReach,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PositionTrigger => write!(f, "position_trigger"),
            Self::PositionExit => write!(f, "position_exit"),
            Self::TpReach => write!(f, "tp_reach"),
            Self::SlReach => write!(f, "sl_reach"),
        }
    }
}
