//! Launches plugins as child processes.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;

use hookwire_bridge::HandshakeConfig;
use hookwire_plugins::BundleInfo;
use hookwire_plugins::manifest::current_platform;
use tracing::{debug, warn};

use super::{LaunchError, LaunchedPlugin, PLUGIN_OUTPUT_TARGET, PluginLauncher, PluginProcess};

/// Spawns the manifest's server executable with piped stdio.
///
/// The child runs inside its bundle directory and receives the handshake
/// cookie through its environment. Its stderr is forwarded to tracing.
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher {
    handshake: HandshakeConfig,
}

impl CommandLauncher {
    /// Creates a launcher using the default handshake cookie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a launcher with a custom handshake.
    #[must_use]
    pub const fn with_handshake(handshake: HandshakeConfig) -> Self {
        Self { handshake }
    }
}

impl PluginLauncher for CommandLauncher {
    fn launch(&self, bundle: &BundleInfo) -> Result<LaunchedPlugin, LaunchError> {
        let plugin_id = bundle.id().to_owned();
        let executable = bundle
            .server_executable()
            .ok_or_else(|| LaunchError::NoExecutable {
                plugin_id: plugin_id.clone(),
                platform: current_platform(),
            })?;
        let args = bundle
            .manifest()
            .server()
            .map(|server| server.args().to_vec())
            .unwrap_or_default();

        let mut child = Command::new(&executable)
            .args(&args)
            .current_dir(bundle.path())
            .env(self.handshake.cookie_key(), self.handshake.cookie_value())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                plugin_id: plugin_id.clone(),
                path: executable.clone(),
                source: Arc::new(source),
            })?;
        debug!(
            target: PLUGIN_OUTPUT_TARGET,
            plugin_id,
            pid = child.id(),
            executable = %executable.display(),
            "plugin process spawned"
        );

        let pipes = (child.stdin.take(), child.stdout.take());
        let (Some(stdin), Some(stdout)) = pipes else {
            drop(child.kill());
            drop(child.wait());
            return Err(LaunchError::MissingPipe {
                plugin_id,
                pipe: "stdio",
            });
        };
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(&plugin_id, stderr);
        }

        Ok(LaunchedPlugin {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Box::new(ChildProcess { child }),
        })
    }
}

/// Forwards plugin stderr line by line so the pipe never fills.
fn forward_stderr(plugin_id: &str, stderr: impl Read + Send + 'static) {
    let owned = plugin_id.to_owned();
    let spawned = thread::Builder::new()
        .name(format!("hookwired-stderr-{plugin_id}"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) => debug!(target: PLUGIN_OUTPUT_TARGET, plugin_id = %owned, "{line}"),
                    Err(_) => break,
                }
            }
        });
    if let Err(error) = spawned {
        warn!(target: PLUGIN_OUTPUT_TARGET, plugin_id, %error, "cannot forward plugin stderr");
    }
}

struct ChildProcess {
    child: Child,
}

impl PluginProcess for ChildProcess {
    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(&mut self) {
        drop(self.child.kill());
    }

    fn wait(&mut self) {
        drop(self.child.wait());
    }
}
