//! Reconciles running plugins with their configured activation flags.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::BuildHasher;
use std::sync::{Mutex, PoisonError};
use std::thread;

use tracing::{debug, info, warn};

use crate::environment::{Environment, EnvironmentError};

const SYNC_TARGET: &str = "hookwired::sync";

/// What a sync pass changed.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Plugins started by the pass.
    pub activated: Vec<String>,
    /// Plugins stopped by the pass.
    pub deactivated: Vec<String>,
    /// Plugins that could not be started, with the reason.
    pub failed: Vec<(String, EnvironmentError)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Job {
    Activate(String),
    Deactivate(String),
}

enum Outcome {
    Activated(String),
    Deactivated(String),
    Unchanged,
    Failed(String, EnvironmentError),
}

/// Activates every installed plugin flagged on and deactivates every
/// running plugin flagged off or missing from `flags`.
///
/// Jobs run on at most `workers` threads; a failure to activate one plugin
/// is recorded in the report and does not stop the others.
///
/// # Errors
///
/// Returns [`EnvironmentError`] only when the plugin directory cannot be
/// listed.
pub fn sync_active_state<S: BuildHasher>(
    environment: &Environment,
    flags: &HashMap<String, bool, S>,
    workers: usize,
) -> Result<SyncReport, EnvironmentError> {
    let jobs = plan(environment, flags)?;
    let mut report = SyncReport::default();
    if jobs.is_empty() {
        return Ok(report);
    }

    let pool_size = workers.clamp(1, jobs.len());
    debug!(target: SYNC_TARGET, jobs = jobs.len(), pool_size, "syncing plugin states");
    let queue = Mutex::new(jobs);
    let outcomes = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for index in 0..pool_size {
            let spawned = thread::Builder::new()
                .name(format!("hookwired-sync-{index}"))
                .spawn_scoped(scope, || drain(environment, &queue, &outcomes));
            if let Err(error) = spawned {
                warn!(target: SYNC_TARGET, %error, "cannot spawn sync worker");
            }
        }
    });
    // Covers the case where no worker could be spawned.
    drain(environment, &queue, &outcomes);

    for outcome in outcomes.into_inner().unwrap_or_else(PoisonError::into_inner) {
        match outcome {
            Outcome::Activated(plugin_id) => report.activated.push(plugin_id),
            Outcome::Deactivated(plugin_id) => report.deactivated.push(plugin_id),
            Outcome::Failed(plugin_id, error) => report.failed.push((plugin_id, error)),
            Outcome::Unchanged => {}
        }
    }
    report.activated.sort();
    report.deactivated.sort();
    report.failed.sort_by(|left, right| left.0.cmp(&right.0));
    info!(
        target: SYNC_TARGET,
        activated = report.activated.len(),
        deactivated = report.deactivated.len(),
        failed = report.failed.len(),
        "plugin states synced"
    );
    Ok(report)
}

fn plan<S: BuildHasher>(
    environment: &Environment,
    flags: &HashMap<String, bool, S>,
) -> Result<VecDeque<Job>, EnvironmentError> {
    let mut jobs = VecDeque::new();
    let mut seen = HashSet::new();
    for bundle in environment.available()? {
        let plugin_id = bundle.id().to_owned();
        if !seen.insert(plugin_id.clone()) {
            continue;
        }
        if flags.get(&plugin_id).copied().unwrap_or(false) {
            jobs.push_back(Job::Activate(plugin_id));
        } else if environment.is_active(&plugin_id) {
            jobs.push_back(Job::Deactivate(plugin_id));
        }
    }
    for bundle in environment.active() {
        if !seen.contains(bundle.id()) {
            jobs.push_back(Job::Deactivate(bundle.id().to_owned()));
        }
    }
    Ok(jobs)
}

fn drain(environment: &Environment, queue: &Mutex<VecDeque<Job>>, outcomes: &Mutex<Vec<Outcome>>) {
    loop {
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(job) = next else {
            return;
        };
        let outcome = run(environment, job);
        outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome);
    }
}

fn run(environment: &Environment, job: Job) -> Outcome {
    match job {
        Job::Activate(plugin_id) => match environment.activate(&plugin_id) {
            Ok(activation) if activation.activated => Outcome::Activated(plugin_id),
            Ok(_) => Outcome::Unchanged,
            Err(error) => Outcome::Failed(plugin_id, error),
        },
        Job::Deactivate(plugin_id) => {
            if environment.deactivate(&plugin_id) {
                Outcome::Deactivated(plugin_id)
            } else {
                Outcome::Unchanged
            }
        }
    }
}

#[cfg(test)]
mod tests;
