//! Proxy module for shadowing live traffic
//!
//! This module implements the dual-path architecture:
//! - Authoritative path: the client's request and response, untouched
//! - Shadow path: a detached copy sent to the candidate and diffed

pub mod backend_client;
pub mod error_response;
pub mod headers;
pub mod middleware;
pub mod middleware_stack;
pub mod orchestrator;
pub mod sampler;
pub mod service;
pub mod types;
pub mod url_resolver;

#[cfg(test)]
pub mod test_utils;


pub use backend_client::{BackendClient, HyperBackendClient};
pub use orchestrator::{ShadowDisposition, ShadowHandle, ShadowOrchestrator, ShadowOutcome};
pub use sampler::{Sampler, SamplingDecision};
pub use service::ShadowProxyService;
pub use types::{ProxyError, ProxyResult, ShadowConfig, ShadowRequest};
