//! Stubs and skeletons for the three bridge streams a plugin uses.
//!
//! The host dials the plugin's hooks stream through [`HooksClient`] and
//! serves [`ApiServer`] and [`DriverServer`] on streams it opens during
//! activation. The plugin serves [`HooksServer`] and dials back through
//! [`ApiClient`] and [`DriverClient`]. Stream 0 carries
//! [`ControlClient`]/[`ControlServer`] traffic.

mod api;
mod control;
mod driver;
mod hooks;

use hookwire_bridge::{BridgeError, RemoteError};

pub use api::{ApiClient, ApiServer};
pub use control::{ControlClient, ControlServer};
pub use driver::{DriverClient, DriverServer};
pub use hooks::{ActivateArgs, HooksClient, HooksServer};

/// Method answering the set of implemented hooks.
pub const IMPLEMENTED_METHOD: &str = "implemented";

fn into_remote(error: BridgeError) -> RemoteError {
    match error {
        BridgeError::Remote(remote) => remote,
        other => RemoteError::message(other),
    }
}

#[cfg(test)]
mod tests;
