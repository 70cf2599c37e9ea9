//! Claims (disputes) and their resolution workflow

pub mod model;
pub mod service;

pub use model::{
    Claim, ClaimDecision, ClaimStatus, ClaimantRole, CreateClaimRequest, ListClaimsQuery,
    ResolveClaimRequest,
};
pub use service::ClaimService;
