//! Worker lease manager.
//!
//! A worker consumes from exactly one of:
//! - the shared default queue (idle, available to any build), or
//! - one exclusive build queue `<prefix>-<build_id>` (leased).
//!
//! `claim` moves Default -> Exclusive, `release` moves Exclusive -> Default.
//! Both may run a script in between. Once the worker has left a queue, a
//! [`RejoinGuard`] puts it back on the default queue on every exit path
//! that does not complete the transition, including errors raised by the
//! script executor and panics, so a worker is never left consuming nothing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use tracing::{error, info, warn};

use mule_protocol::ops::{LeaseReport, LeaseResponse};
use mule_protocol::ENV_BUILD_ID;

use crate::config::WorkerConfig;
use crate::executor::{ExecutorError, ScriptExecutor, ScriptResult};
use crate::queue::{QueueError, QueueResult, QueueSubstrate};

/// Reason reported when another claim or release is in flight.
pub const REASON_TRANSITIONING: &str = "worker is busy with another claim or release";

/// Errors from lease operations.
///
/// A rejected claim is not an error; it is a [`LeaseResponse::Fail`].
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("build id must not be empty")]
    EmptyBuildId,

    #[error("cannot pass a {script} script without a workspace")]
    ScriptWithoutWorkspace { script: &'static str },

    #[error("{script} script failed to run: {source}")]
    Script {
        script: &'static str,
        #[source]
        source: ExecutorError,
    },

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Lease-related configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    pub default_queue: String,
    pub build_queue_prefix: String,
}

impl From<&WorkerConfig> for LeaseConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            default_queue: config.default_queue.clone(),
            build_queue_prefix: config.build_queue_prefix.clone(),
        }
    }
}

/// Observable lease state of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    /// Consuming from the default queue only.
    Default,
    /// Consuming from the exclusive queue of one build.
    Exclusive { build_id: String },
    /// A claim or release is in flight, or the queue set is not one of the
    /// two steady states.
    Transitioning,
}

/// Which script a lease operation runs.
#[derive(Debug, Clone, Copy)]
enum LeaseScript {
    Setup,
    Teardown,
}

impl LeaseScript {
    fn label(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Teardown => "teardown",
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::Setup => "setup.sh",
            Self::Teardown => "teardown.sh",
        }
    }
}

/// Puts the worker back on the default queue when dropped while armed.
///
/// Leaves the build queue first so the worker never ends up consuming
/// from both.
struct RejoinGuard<'a> {
    queues: &'a dyn QueueSubstrate,
    default_queue: &'a str,
    build_queue: &'a str,
    armed: bool,
}

impl<'a> RejoinGuard<'a> {
    fn arm(queues: &'a dyn QueueSubstrate, default_queue: &'a str, build_queue: &'a str) -> Self {
        Self {
            queues,
            default_queue,
            build_queue,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RejoinGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(queue = self.default_queue, "transition aborted, rejoining default queue");
        if let Err(e) = self.queues.cancel_consumer(self.build_queue) {
            error!(queue = self.build_queue, error = %e, "failed to leave build queue");
        }
        if let Err(e) = join_queue(self.queues, self.default_queue) {
            error!(queue = self.default_queue, error = %e, "failed to rejoin default queue");
        }
    }
}

/// Declare a queue and start consuming from it.
fn join_queue(queues: &dyn QueueSubstrate, name: &str) -> QueueResult<()> {
    queues.declare(name)?;
    queues.consume(name)
}

/// Owns one worker's queue membership.
pub struct LeaseManager {
    config: LeaseConfig,
    queues: Arc<dyn QueueSubstrate>,
    executor: Arc<ScriptExecutor>,
    /// Held for the whole of a claim or release.
    transition: Mutex<()>,
}

impl LeaseManager {
    pub fn new(
        config: LeaseConfig,
        queues: Arc<dyn QueueSubstrate>,
        executor: Arc<ScriptExecutor>,
    ) -> Self {
        Self {
            config,
            queues,
            executor,
            transition: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Name of the exclusive queue for `build_id`.
    pub fn build_queue(&self, build_id: &str) -> String {
        mule_protocol::build_queue_name(&self.config.build_queue_prefix, build_id)
    }

    /// Queues the worker currently consumes from.
    pub fn queue_set(&self) -> BTreeSet<String> {
        self.queues.active_queues()
    }

    pub fn state(&self) -> LeaseState {
        let Some(_transition) = self.try_begin() else {
            return LeaseState::Transitioning;
        };

        let active = self.queues.active_queues();
        if active.len() != 1 {
            return LeaseState::Transitioning;
        }
        let Some(queue) = active.into_iter().next() else {
            return LeaseState::Transitioning;
        };
        if queue == self.config.default_queue {
            return LeaseState::Default;
        }
        let prefix = format!("{}-", self.config.build_queue_prefix);
        match queue.strip_prefix(&prefix) {
            Some(build_id) if !build_id.is_empty() => LeaseState::Exclusive {
                build_id: build_id.to_string(),
            },
            _ => LeaseState::Transitioning,
        }
    }

    /// Leave the default queue and bind the worker to `build_id`.
    ///
    /// Runs `script` (with `BUILD_ID` exported) in `workspace` between
    /// leaving the default queue and joining the build queue.
    pub fn claim(
        &self,
        build_id: &str,
        workspace: Option<&str>,
        script: Option<&str>,
    ) -> Result<LeaseResponse, LeaseError> {
        check_preconditions(LeaseScript::Setup, build_id, workspace, script)?;
        self.check_workdir(LeaseScript::Setup, workspace, script)?;

        let Some(_transition) = self.try_begin() else {
            warn!(build_id, "claim rejected: {}", REASON_TRANSITIONING);
            return Ok(LeaseResponse::in_use());
        };

        if !self.is_only_on(&self.config.default_queue) {
            info!(build_id, "claim rejected: worker is already in use");
            return Ok(LeaseResponse::in_use());
        }

        let queue_name = self.build_queue(build_id);
        let guard = RejoinGuard::arm(&*self.queues, &self.config.default_queue, &queue_name);

        self.queues.cancel_consumer(&self.config.default_queue)?;
        let script_result = self.run_script(LeaseScript::Setup, build_id, workspace, script)?;
        join_queue(&*self.queues, &queue_name)?;

        guard.disarm();
        info!(build_id, queue = %queue_name, "Started consuming from {}", queue_name);

        Ok(LeaseResponse::Ok(report(build_id, script_result)))
    }

    /// Drop the build's pending work and return the worker to the default
    /// queue.
    ///
    /// Runs `script` (with `BUILD_ID` exported) in `workspace` after
    /// leaving the build queue and before rejoining the default queue.
    pub fn release(
        &self,
        build_id: &str,
        workspace: Option<&str>,
        script: Option<&str>,
    ) -> Result<LeaseResponse, LeaseError> {
        check_preconditions(LeaseScript::Teardown, build_id, workspace, script)?;
        self.check_workdir(LeaseScript::Teardown, workspace, script)?;

        let Some(_transition) = self.try_begin() else {
            warn!(build_id, "release rejected: {}", REASON_TRANSITIONING);
            return Ok(LeaseResponse::Fail {
                reason: REASON_TRANSITIONING.to_string(),
            });
        };

        let queue_name = self.build_queue(build_id);
        if !self.is_only_on(&queue_name) {
            info!(build_id, "release rejected: worker is not leased to this build");
            return Ok(LeaseResponse::Fail {
                reason: format!("worker is not leased to build {}", build_id),
            });
        }

        let guard = RejoinGuard::arm(&*self.queues, &self.config.default_queue, &queue_name);

        let purged = self.queues.purge(&queue_name)?;
        if purged > 0 {
            info!(build_id, queue = %queue_name, purged, "discarded unfinished jobs");
        }
        self.queues.cancel_consumer(&queue_name)?;

        let script_result = self.run_script(LeaseScript::Teardown, build_id, workspace, script)?;
        join_queue(&*self.queues, &self.config.default_queue)?;

        guard.disarm();
        info!(build_id, "Rejoined default queue");

        Ok(LeaseResponse::Ok(report(build_id, script_result)))
    }

    fn try_begin(&self) -> Option<MutexGuard<'_, ()>> {
        match self.transition.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Reject an unusable workspace before any queue is touched.
    fn check_workdir(
        &self,
        which: LeaseScript,
        workspace: Option<&str>,
        script: Option<&str>,
    ) -> Result<(), LeaseError> {
        if script.is_none() {
            return Ok(());
        }
        match self.executor.resolve_workdir(workspace) {
            Ok(_) => Ok(()),
            Err(source) if source.is_precondition() => Err(LeaseError::Script {
                script: which.label(),
                source,
            }),
            Err(_) => Ok(()),
        }
    }

    fn is_only_on(&self, queue: &str) -> bool {
        let active = self.queues.active_queues();
        active.len() == 1 && active.contains(queue)
    }

    fn run_script(
        &self,
        which: LeaseScript,
        build_id: &str,
        workspace: Option<&str>,
        script: Option<&str>,
    ) -> Result<Option<ScriptResult>, LeaseError> {
        let Some(script) = script else {
            return Ok(None);
        };
        self.executor
            .execute(which.file_name(), script, workspace, &[(ENV_BUILD_ID, build_id)])
            .map(Some)
            .map_err(|source| LeaseError::Script {
                script: which.label(),
                source,
            })
    }
}

fn check_preconditions(
    which: LeaseScript,
    build_id: &str,
    workspace: Option<&str>,
    script: Option<&str>,
) -> Result<(), LeaseError> {
    if build_id.is_empty() {
        return Err(LeaseError::EmptyBuildId);
    }
    let has_workspace = workspace.is_some_and(|ws| !ws.is_empty());
    if script.is_some() && !has_workspace {
        return Err(LeaseError::ScriptWithoutWorkspace {
            script: which.label(),
        });
    }
    Ok(())
}

fn report(build_id: &str, script_result: Option<ScriptResult>) -> LeaseReport {
    match script_result {
        Some(result) => LeaseReport {
            build_id: build_id.to_string(),
            stdout: result.stdout().to_string(),
            stderr: result.stderr().to_string(),
            retcode: result.exit_code(),
        },
        None => LeaseReport {
            build_id: build_id.to_string(),
            stdout: String::new(),
            stderr: String::new(),
            retcode: 0,
        },
    }
}
