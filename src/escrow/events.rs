//! Domain events emitted by the escrow core
//!
//! The financial core never writes notifications or pushes to sockets
//! directly; it returns these events and the dispatcher in
//! `crate::notifications` (plus the WebSocket broadcast) turns them into
//! user-facing effects.

use serde::Serialize;
use uuid::Uuid;

use crate::claims::model::ClaimStatus;

#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// Funds captured and held for a booking
    EscrowHeld { booking_id: Uuid, amount: i64 },
    /// Checkout never completed; booking payment failed
    PaymentFailed { booking_id: Uuid },
    /// Rental amount transferred to the owner
    RentalReleased {
        booking_id: Uuid,
        owner_id: Uuid,
        amount: i64,
    },
    /// Deposit refunded to the renter
    DepositReturned {
        booking_id: Uuid,
        renter_id: Uuid,
        amount: i64,
    },
    /// Deposit transferred to the owner instead of the renter
    DepositForfeited {
        booking_id: Uuid,
        owner_id: Uuid,
        amount: i64,
    },
    /// Funds refunded to the renter
    EscrowRefunded {
        booking_id: Uuid,
        renter_id: Uuid,
        amount: i64,
    },
    /// Both legs settled; escrow closed out
    EscrowReleased { booking_id: Uuid },
    /// A dispute was filed against a booking
    ClaimFiled {
        claim_id: Uuid,
        booking_id: Uuid,
        claimant_id: Uuid,
    },
    /// A claim moved to a new status
    ClaimStatusChanged {
        claim_id: Uuid,
        booking_id: Uuid,
        status: ClaimStatus,
    },
}
