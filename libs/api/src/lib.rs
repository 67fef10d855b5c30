//! # metal-api
//!
//! Record types for the managed bare-metal resources.
//!
//! ## Design Principles
//!
//! - A record is `{metadata, spec, status}`; the spec is user intent, the
//!   status is what the controller last observed
//! - `spec.externalName` is the provider-side identity, written exactly once
//! - Optional parameters are `Option`s so "unset" is distinguishable from a
//!   provider default (late initialization relies on this)
//! - All kinds share one dynamic form ([`DynamicObject`]) for storage
//!
//! ## Kinds
//!
//! - [`Device`]: a bare-metal server
//! - [`Assignment`]: a virtual network attached to a device port
//! - [`VirtualNetwork`]: reference target for assignments (not reconciled here)

mod assignment;
mod condition;
mod device;
mod error;
mod macros;
mod meta;
mod reference;
mod resource;
mod virtual_network;

pub use assignment::*;
pub use condition::*;
pub use device::*;
pub use error::ApiError;
pub use meta::*;
pub use reference::*;
pub use resource::*;
pub use virtual_network::*;
