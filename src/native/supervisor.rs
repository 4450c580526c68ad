use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use tokio::{
    process::{Child, Command},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    constants::{DESCENDANT_SNAPSHOT_INTERVAL_MS, KILL_PASS_INTERVAL_MS, MAX_KILL_PASSES},
    core::{args::CommandLineArgs, traits::process_tree::ProcessTree, traits::runner::RunError},
};

/// Everything needed to start a runner process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Invocation {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl Invocation {
    pub fn new<T: AsRef<Path>>(executable: T, args: &CommandLineArgs) -> Self {
        Invocation {
            executable: executable.as_ref().into(),
            args: args.to_args(),
            working_directory: args.working_directory.clone(),
            environment: args.environment.clone(),
            stdout: args.stdout_file.clone(),
            stderr: args.stderr_file.clone(),
        }
    }
}

enum Stop {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut(Duration),
}

/// Runs one process at a time per call, racing its exit against
/// cancellation and a timeout, and tears down the whole process tree when
/// the process has to be stopped.
#[derive(Debug)]
pub struct ProcessSupervisor {
    tree: Arc<dyn ProcessTree>,
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(tree: Arc<dyn ProcessTree>, grace_period: Duration) -> Self {
        ProcessSupervisor { tree, grace_period }
    }

    /// Resolves to the exit code of the process.
    ///
    /// Once `cancel` fires the result is [`RunError::Cancelled`], even if the
    /// process exits at the same time.
    #[tracing::instrument(skip_all, fields(executable = %invocation.executable.display()))]
    pub async fn execute(
        &self,
        invocation: &Invocation,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<i32, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let mut child = spawn(invocation)?;
        let Some(pid) = child.id() else {
            return Err(launch_error(invocation, "process exited before it could be supervised"));
        };
        tracing::debug!(pid, args = ?invocation.args, "Started runner");

        let deadline = async {
            match timeout {
                Some(timeout) => {
                    tokio::time::sleep(timeout).await;
                    timeout
                }
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        // Descendants seen while the runner is alive. Orphans are no longer
        // reachable from the runner once it has exited.
        let mut known = BTreeSet::new();
        let interval = Duration::from_millis(DESCENDANT_SNAPSHOT_INTERVAL_MS);
        let mut snapshots = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        snapshots.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Stop::Cancelled,
                status = child.wait() => break Stop::Exited(status),
                timeout = &mut deadline => break Stop::TimedOut(timeout),
                _ = snapshots.tick() => {
                    known.retain(|descendant| self.tree.is_alive(*descendant));
                    self.collect_descendants(pid, &mut known);
                }
            }
        };

        match stop {
            Stop::Exited(Ok(_)) if cancel.is_cancelled() => {
                tracing::info!(pid, "Runner exited while being cancelled");
                self.kill_all(known).await;
                Err(RunError::Cancelled)
            }
            Stop::Exited(Ok(status)) => {
                tracing::debug!(pid, %status, "Runner exited");
                Ok(status.code().unwrap_or(-1))
            }
            Stop::Exited(Err(e)) => {
                self.teardown(&mut child, pid, known).await;
                Err(RunError::Teardown {
                    pid,
                    msg: e.to_string(),
                })
            }
            Stop::Cancelled => {
                tracing::info!(pid, "Cancelling runner");
                self.teardown(&mut child, pid, known).await;
                Err(RunError::Cancelled)
            }
            Stop::TimedOut(timeout) => {
                tracing::warn!(pid, timeout_ms = timeout.as_millis() as u64, "Runner timed out");
                self.teardown(&mut child, pid, known).await;
                if cancel.is_cancelled() {
                    Err(RunError::Cancelled)
                } else {
                    Err(RunError::Timeout { timeout })
                }
            }
        }
    }

    /// Stops `child` and every process it spawned. Failures are logged and
    /// teardown carries on with what it knows.
    async fn teardown(&self, child: &mut Child, pid: u32, mut known: BTreeSet<u32>) {
        // Descendants are reparented once their parent dies, so the tree is
        // captured while it is still intact
        self.collect_descendants(pid, &mut known);

        if let Err(e) = self.tree.interrupt(pid) {
            tracing::warn!(pid, error = %e, "Failed to interrupt runner");
        }

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(pid, %status, "Runner exited after interrupt"),
            Ok(Err(e)) => tracing::warn!(pid, error = %e, "Failed to wait for runner"),
            Err(_) => {
                tracing::debug!(pid, "Runner ignored interrupt, killing it");
                self.collect_descendants(pid, &mut known);
                if let Err(e) = child.start_kill() {
                    tracing::warn!(pid, error = %e, "Failed to kill runner");
                }
            }
        }

        if let Err(e) = child.wait().await {
            tracing::warn!(pid, error = %e, "Failed to reap runner");
        }

        self.kill_all(known).await;
    }

    /// Kills `known` processes and their descendants until none is left
    /// alive or the pass limit is reached.
    async fn kill_all(&self, mut known: BTreeSet<u32>) {
        for pass in 0..MAX_KILL_PASSES {
            for pid in known.clone() {
                self.collect_descendants(pid, &mut known);
            }

            let alive: Vec<u32> = known
                .iter()
                .copied()
                .filter(|pid| self.tree.is_alive(*pid))
                .collect();
            if alive.is_empty() {
                tracing::debug!(pass, processes = known.len(), "Process tree torn down");
                return;
            }

            for pid in alive {
                self.collect_descendants(pid, &mut known);
                if let Err(e) = self.tree.kill(pid) {
                    tracing::warn!(pid, error = %e, "Failed to kill descendant");
                }
            }

            tokio::time::sleep(Duration::from_millis(KILL_PASS_INTERVAL_MS)).await;
        }

        let survivors: Vec<u32> = known
            .into_iter()
            .filter(|pid| self.tree.is_alive(*pid))
            .collect();
        if !survivors.is_empty() {
            tracing::error!(?survivors, "Processes survived teardown");
        }
    }

    fn collect_descendants(&self, pid: u32, known: &mut BTreeSet<u32>) {
        let children = match self.tree.children(pid) {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(pid, error = %e, "Failed to enumerate child processes");
                return;
            }
        };

        for child in children {
            if known.insert(child) {
                self.collect_descendants(child, known);
            }
        }
    }
}

fn spawn(invocation: &Invocation) -> Result<Child, RunError> {
    let mut command = Command::new(&invocation.executable);
    command
        .args(&invocation.args)
        .envs(&invocation.environment)
        .stdin(Stdio::null())
        .stdout(redirect(invocation, invocation.stdout.as_deref())?)
        .stderr(redirect(invocation, invocation.stderr.as_deref())?)
        .kill_on_drop(true);
    if let Some(dir) = &invocation.working_directory {
        command.current_dir(dir);
    }

    command
        .spawn()
        .map_err(|e| launch_error(invocation, &e.to_string()))
}

fn redirect(invocation: &Invocation, path: Option<&Path>) -> Result<Stdio, RunError> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };
    File::create(path).map(Stdio::from).map_err(|e| {
        launch_error(
            invocation,
            &format!("cannot create '{}': {}", path.display(), e),
        )
    })
}

fn launch_error(invocation: &Invocation, msg: &str) -> RunError {
    RunError::Launch {
        executable: invocation.executable.clone(),
        msg: msg.to_string(),
    }
}
