//! Domain layer: memberships, registry events, and request-side policy.
//!
//! This module holds the server-side model independent of storage and
//! transport: the membership aggregate, the closed set of registry events
//! the watcher understands, address checksumming, and the report call
//! window.

pub mod address;
pub mod call_window;
pub mod membership;
pub mod registry_event;

pub use call_window::{CallWindow, RateLimitError};
pub use membership::{Membership, MembershipStatus};
pub use registry_event::{ChainEvent, RegistryEvent};
