//! Shadow Proxy - mirrors live traffic to a candidate service
//!
//! Every request is served by the authoritative backend. A sampled subset is
//! replayed against a candidate in the background and the two responses are
//! compared structurally, so a migration can be validated without any client
//! ever seeing the candidate.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod proxy;

pub use application::Application;
pub use error::{Error, Result};
