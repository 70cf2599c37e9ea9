//! Route definitions for the RigShare escrow API

mod claims;
mod escrow;
mod webhook;

pub use claims::claim_routes;
pub use escrow::escrow_routes;
pub use webhook::webhook_routes;
