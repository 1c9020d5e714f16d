//! Power/line-fault classification
//!
//! The transceiver hardware reports electrical anomalies on the bus
//! medium already classified into a closed set of kinds. The kind only
//! selects how a fault is reported; every kind converges on the same
//! recovery state machine.

use crate::address::NodeAddr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware-classified electrical fault on the bus medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Positive line shorted to ground.
    ShortToGround,
    /// Positive line shorted to the supply rail.
    ShortToSupply,
    /// The two bus wires shorted together.
    WiresShortedTogether,
    /// Cable disconnected / open circuit.
    CableDisconnected,
    /// Cable connected with reversed polarity.
    CableReversed,
    /// Fault detected but the transceiver could not narrow it down.
    Indeterminate,
    /// Short to ground somewhere downstream, not localized to a node.
    NonLocalizedShortToGround,
    /// Short to the supply rail somewhere downstream, not localized.
    NonLocalizedShortToSupply,
    /// Node failed its power-up sequence.
    StartupError,
    /// Reported code outside the known taxonomy.
    Unknown,
}

impl FaultKind {
    /// Short string form used in logs and status snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortToGround => "short-to-ground",
            Self::ShortToSupply => "short-to-supply",
            Self::WiresShortedTogether => "wires-shorted-together",
            Self::CableDisconnected => "cable-disconnected",
            Self::CableReversed => "cable-reversed",
            Self::Indeterminate => "indeterminate",
            Self::NonLocalizedShortToGround => "non-localized-short-to-ground",
            Self::NonLocalizedShortToSupply => "non-localized-short-to-supply",
            Self::StartupError => "startup-error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the transceiver could attribute the fault to a node.
    pub const fn is_localized(&self) -> bool {
        !matches!(
            self,
            Self::NonLocalizedShortToGround | Self::NonLocalizedShortToSupply | Self::Indeterminate
        )
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed fault, attributed to a node where possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultEvent {
    /// Faulting node, or [`NodeAddr::Unknown`] for non-localized kinds.
    pub node: NodeAddr,
    /// Hardware classification.
    pub kind: FaultKind,
}

impl fmt::Display for FaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_forms_are_distinct() {
        let kinds = [
            FaultKind::ShortToGround,
            FaultKind::ShortToSupply,
            FaultKind::WiresShortedTogether,
            FaultKind::CableDisconnected,
            FaultKind::CableReversed,
            FaultKind::Indeterminate,
            FaultKind::NonLocalizedShortToGround,
            FaultKind::NonLocalizedShortToSupply,
            FaultKind::StartupError,
            FaultKind::Unknown,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                assert_ne!(a.as_str(), b.as_str());
            }
        }
    }

    #[test]
    fn localization() {
        assert!(FaultKind::CableDisconnected.is_localized());
        assert!(!FaultKind::NonLocalizedShortToSupply.is_localized());
        assert!(!FaultKind::Indeterminate.is_localized());
    }
}
