//! Metal controller library.
//!
//! This crate primarily ships a `metal-controller` binary, but the
//! reconciliation core, store and provider seams are exposed for
//! integration testing and reuse.

pub mod config;
pub mod error;
pub mod provider;
pub mod reconciler;
pub mod secrets;
pub mod store;

pub use error::{ReconcileError, RetryClass};
