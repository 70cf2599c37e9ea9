//! API handlers for the RigShare escrow server

pub mod claims;
pub mod escrow;
pub mod webhook;

pub use claims::*;
pub use escrow::*;
pub use webhook::*;
