//! Escrow ledger and release engine

pub mod events;
pub mod model;
pub mod plan;
pub mod service;

pub use events::DomainEvent;
pub use model::{
    EscrowStatus, EscrowTransaction, ReleaseOutcome, ReleaseRequest, ReleaseType,
};
pub use plan::{LegAction, ReleasePlan};
pub use service::EscrowService;
