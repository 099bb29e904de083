//! Chain-of-responsibility execution over plugin instances.

use hookwire_plugins::{HookError, HookId, PluginHooks};
use tracing::{debug, trace};

use super::{DispatchError, MANAGER_TARGET, PluginInstance};

/// Threads `initial` through every instance implementing `hook`.
///
/// An instance answering `NotImplemented` leaves the value untouched; any
/// other error ends the dispatch and no partial value escapes.
pub(super) fn run_chain<T, F>(
    instances: &[PluginInstance],
    hook: HookId,
    initial: T,
    mut step: F,
) -> Result<T, DispatchError>
where
    F: FnMut(&dyn PluginHooks, &T) -> Result<T, HookError>,
{
    let mut value = initial;
    for instance in instances {
        if !instance.implements(hook) {
            continue;
        }
        match step(instance.hooks(), &value) {
            Ok(next) => {
                trace!(target: MANAGER_TARGET, plugin_id = instance.plugin_id(), %hook, "value replaced");
                value = next;
            }
            Err(error) if error.is_not_implemented() => {
                trace!(target: MANAGER_TARGET, plugin_id = instance.plugin_id(), %hook, "plugin declined");
            }
            Err(error) => {
                debug!(
                    target: MANAGER_TARGET,
                    plugin_id = instance.plugin_id(),
                    %hook,
                    %error,
                    "hook aborted the chain"
                );
                return Err(DispatchError::Hook {
                    plugin_id: instance.plugin_id().to_owned(),
                    hook,
                    source: error,
                });
            }
        }
    }
    Ok(value)
}
