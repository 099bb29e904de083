//! Host runtime for out-of-process plugins.
//!
//! `hookwired` discovers plugin bundles on disk, launches each plugin's
//! server component as a child process, and talks to it over the
//! multiplexed call bridge from [`hookwire_bridge`]. The pieces build on one
//! another:
//!
//! - [`supervisor`] owns one plugin process: launch, handshake, capability
//!   discovery, health pings and termination.
//! - [`environment`] is the registry of installed plugins and their
//!   supervisors, with per-plugin activation and concurrent shutdown.
//! - [`manager`] dispatches typed hooks over the running plugins, either as
//!   a chain threading a value through every implementing plugin or as a
//!   single call addressed to one plugin.
//! - [`sync`], [`health`] and [`install`] keep the registry in line with
//!   configuration, with plugin liveness and with archives on disk.
//!
//! Plugins reach back into the host through [`api`], which serves the
//! [`kv`] store and stored [`configuration`] scoped to each plugin.

pub mod api;
pub mod config;
pub mod configuration;
pub mod daemon;
pub mod environment;
pub mod health;
pub mod install;
pub mod kv;
pub mod launcher;
pub mod manager;
pub mod signature;
pub mod supervisor;
pub mod sync;
pub mod telemetry;

#[cfg(test)]
mod test_support;
