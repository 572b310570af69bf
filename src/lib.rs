//! Labelgate - startup-buffering gateway and product tooling for a label generator
//!
//! This library provides:
//! - An upstream process manager that installs dependencies, launches the
//!   label application and watches its output for a readiness marker
//! - A readiness gate that queues requests arriving before the application is
//!   ready and releases them in arrival order
//! - A forwarder that relays requests verbatim to the application on loopback
//! - Product list storage, search/batch filtering and row selection used to
//!   build label jobs

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod forward;
pub mod gate;
pub mod gateway;
pub mod message;
pub mod process;
pub mod proxy;
pub mod selection;
pub mod store;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
