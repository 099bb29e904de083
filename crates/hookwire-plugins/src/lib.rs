//! Plugin-facing model and runtime pieces shared by the host and plugins.
//!
//! - [`manifest`] and [`bundle`] describe plugins on disk.
//! - [`hooks`] is the hook schema: [`hooks::HookId`], the capability
//!   [`hooks::HookSet`] and the [`hooks::PluginHooks`] trait.
//! - [`money`] and [`model`] are the typed values threaded through hook
//!   chains.
//! - [`api`] declares the services the host exposes back to plugins.
//! - [`rpc`] maps all of the above onto bridge streams.
//! - [`sdk`] is what a plugin executable calls from `main`.

pub mod api;
pub mod bundle;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod model;
pub mod money;
pub mod rpc;
pub mod sdk;

pub use bundle::{BundleInfo, scan};
pub use error::PluginError;
pub use hooks::{HookError, HookId, HookSet, PluginHooks};
pub use manifest::Manifest;
pub use money::{Money, TaxedMoney};

#[cfg(any(test, feature = "test-support"))]
pub use hooks::MockPluginHooks;
