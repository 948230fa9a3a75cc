//! Request authentication.

pub mod signature;

pub use signature::{SigningDomain, VerificationError};
