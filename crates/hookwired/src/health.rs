//! Structured health reporting and the periodic health-check job.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::environment::{Environment, EnvironmentError};
use crate::supervisor::SupervisorError;

const HEALTH_TARGET: &str = "hookwired::health";

/// Observer for plugin lifecycle and health transitions.
pub trait HealthReporter: Send + Sync {
    /// A plugin finished activating.
    fn plugin_activated(&self, plugin_id: &str);

    /// A plugin could not be activated.
    fn activation_failed(&self, plugin_id: &str, error: &EnvironmentError);

    /// A running plugin was stopped.
    fn plugin_deactivated(&self, plugin_id: &str);

    /// A running plugin failed its health check.
    fn health_check_failed(&self, plugin_id: &str, error: &SupervisorError);

    /// An unhealthy plugin was restarted.
    fn plugin_restarted(&self, plugin_id: &str);

    /// Restarting an unhealthy plugin failed.
    fn restart_failed(&self, plugin_id: &str, error: &EnvironmentError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn plugin_activated(&self, plugin_id: &str) {
        (**self).plugin_activated(plugin_id);
    }

    fn activation_failed(&self, plugin_id: &str, error: &EnvironmentError) {
        (**self).activation_failed(plugin_id, error);
    }

    fn plugin_deactivated(&self, plugin_id: &str) {
        (**self).plugin_deactivated(plugin_id);
    }

    fn health_check_failed(&self, plugin_id: &str, error: &SupervisorError) {
        (**self).health_check_failed(plugin_id, error);
    }

    fn plugin_restarted(&self, plugin_id: &str) {
        (**self).plugin_restarted(plugin_id);
    }

    fn restart_failed(&self, plugin_id: &str, error: &EnvironmentError) {
        (**self).restart_failed(plugin_id, error);
    }
}

/// Default reporter that records transitions using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn plugin_activated(&self, plugin_id: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_activated",
            plugin_id,
            "plugin activated"
        );
    }

    fn activation_failed(&self, plugin_id: &str, error: &EnvironmentError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "activation_failed",
            plugin_id,
            error = %error,
            "plugin activation failed"
        );
    }

    fn plugin_deactivated(&self, plugin_id: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_deactivated",
            plugin_id,
            "plugin deactivated"
        );
    }

    fn health_check_failed(&self, plugin_id: &str, error: &SupervisorError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "health_check_failed",
            plugin_id,
            error = %error,
            "plugin health check failed"
        );
    }

    fn plugin_restarted(&self, plugin_id: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_restarted",
            plugin_id,
            "plugin restarted"
        );
    }

    fn restart_failed(&self, plugin_id: &str, error: &EnvironmentError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "restart_failed",
            plugin_id,
            error = %error,
            "plugin restart failed"
        );
    }
}

/// Background thread that periodically health-checks every running plugin.
///
/// The job holds only a weak reference to the environment and stops on its
/// own once the environment is dropped. Dropping the job stops it too.
#[derive(Debug)]
pub struct HealthCheckJob {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HealthCheckJob {
    /// Starts checking `environment` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn start(environment: Weak<Environment>, interval: Duration) -> io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("hookwired-health".to_owned())
            .spawn(move || {
                debug!(target: HEALTH_TARGET, interval_ms = interval.as_millis(), "health-check job started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let Some(live) = environment.upgrade() else {
                        break;
                    };
                    live.check_all_plugins();
                }
                debug!(target: HEALTH_TARGET, "health-check job stopped");
            })?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stops the job and waits for an in-progress sweep to finish.
    pub fn cancel(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take()
            && handle.thread().id() != thread::current().id()
        {
            drop(handle.join());
        }
    }
}

impl Drop for HealthCheckJob {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
