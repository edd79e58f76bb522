//! Shared sync state types.

use serde::{Deserialize, Serialize};

/// Phase of a sync session.
///
/// One-shot sessions end in `Completed` or `Failed`; live sessions cycle
/// through `Negotiating` and `Exchanging` until cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    Negotiating,
    Exchanging,
    Completed,
    Failed,
}

impl SyncPhase {
    /// Whether a session in this phase has finished
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}
