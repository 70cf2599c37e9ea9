//! Pure release planning
//!
//! Maps a release type to the action taken on each escrow leg. The plan is
//! computed without touching the database so the routing table is testable
//! in isolation; the service layer applies it against the booking's leg
//! flags.

use super::model::ReleaseType;

/// Where a leg's funds go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegAction {
    /// Transfer to the owner's connected account
    TransferToOwner,
    /// Refund to the renter's original payment
    RefundToRenter,
}

/// Planned actions for the two escrow legs
///
/// `combined` means both legs move in a single gateway call (one transfer or
/// one refund of the summed amount); it is only set when both legs share the
/// same action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasePlan {
    pub rental: Option<LegAction>,
    pub deposit: Option<LegAction>,
    pub combined: bool,
}

impl ReleasePlan {
    /// Build the plan for a release type
    ///
    /// `deposit_to_owner` redirects the deposit leg on the non-claim paths
    /// (damage deduction agreed at hand-back); claim paths fix the deposit
    /// destination themselves.
    pub fn for_type(release_type: ReleaseType, deposit_to_owner: bool) -> Self {
        match release_type {
            ReleaseType::ReturnConfirmed => ReleasePlan {
                rental: Some(LegAction::TransferToOwner),
                deposit: Some(if deposit_to_owner {
                    LegAction::TransferToOwner
                } else {
                    LegAction::RefundToRenter
                }),
                combined: false,
            },
            ReleaseType::Completed => ReleasePlan {
                rental: None,
                deposit: Some(if deposit_to_owner {
                    LegAction::TransferToOwner
                } else {
                    LegAction::RefundToRenter
                }),
                combined: false,
            },
            ReleaseType::ClaimOwner => ReleasePlan {
                rental: Some(LegAction::TransferToOwner),
                deposit: Some(LegAction::TransferToOwner),
                combined: true,
            },
            ReleaseType::ClaimDenied => ReleasePlan {
                rental: Some(LegAction::TransferToOwner),
                deposit: Some(LegAction::RefundToRenter),
                combined: false,
            },
            ReleaseType::ClaimRenterApproved => ReleasePlan {
                rental: Some(LegAction::RefundToRenter),
                deposit: Some(LegAction::RefundToRenter),
                combined: true,
            },
        }
    }

    /// Whether the plan needs a transfer destination (owner payout account)
    pub fn needs_transfer(&self) -> bool {
        self.rental == Some(LegAction::TransferToOwner)
            || self.deposit == Some(LegAction::TransferToOwner)
    }

    /// Whether the plan refunds anything to the renter
    pub fn needs_refund(&self) -> bool {
        self.rental == Some(LegAction::RefundToRenter)
            || self.deposit == Some(LegAction::RefundToRenter)
    }
}
