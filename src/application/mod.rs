//! Process bootstrap
//!
//! Loads settings, wires the shadow proxy service and serves it.

pub mod app;

pub use app::Application;
