//! Spend Onboarding Common Types
//!
//! Shared types used by the onboarding backend and its upstream clients.

pub mod claims;
pub mod draft;
pub mod membership;

pub use claims::IdentityClaims;
pub use draft::{DraftRecord, DraftUpdate, PostalAddress, ShippingMethod, Status};
pub use membership::{
    ManagerOption, ManagerProfile, ManagerRef, MembershipRecord, MembershipRole, TravelAssignment,
    TravelDetails,
};
