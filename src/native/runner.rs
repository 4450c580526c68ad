use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        args::CommandLineArgs,
        domain::RunnerCapabilities,
        settings::{RunnerSettings, Settings},
        traits::{
            process_tree::ProcessTree,
            runner::{RunError, RunnerFactory, TestRunner},
        },
    },
    native::{
        capabilities::CapabilityCache,
        supervisor::{Invocation, ProcessSupervisor},
    },
};

/// A test executable launched directly by the adapter.
#[derive(Debug)]
pub struct ExternalTestRunner {
    path: PathBuf,
    capabilities: RunnerCapabilities,
    supervisor: Arc<ProcessSupervisor>,
}

impl ExternalTestRunner {
    pub fn new<T: AsRef<Path>>(
        path: T,
        capabilities: RunnerCapabilities,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        ExternalTestRunner {
            path: path.as_ref().into(),
            capabilities,
            supervisor,
        }
    }
}

#[async_trait::async_trait]
impl TestRunner for ExternalTestRunner {
    async fn execute(
        &self,
        args: &CommandLineArgs,
        settings: &RunnerSettings,
        cancel: CancellationToken,
    ) -> Result<i32, RunError> {
        tracing::info!(runner = %self.path.display(), args = %args, "Executing tests");
        let invocation = Invocation::new(&self.path, args);
        self.supervisor
            .execute(&invocation, cancel, settings.timeout)
            .await
    }

    fn source(&self) -> PathBuf {
        self.path.clone()
    }

    fn capabilities(&self) -> RunnerCapabilities {
        self.capabilities
    }
}

/// Provides an [`ExternalTestRunner`] for every source which is an
/// executable file.
#[derive(Debug)]
pub struct DefaultRunnerFactory {
    cache: Arc<CapabilityCache>,
    tree: Arc<dyn ProcessTree>,
}

impl DefaultRunnerFactory {
    pub fn new(cache: Arc<CapabilityCache>, tree: Arc<dyn ProcessTree>) -> Self {
        DefaultRunnerFactory { cache, tree }
    }
}

impl RunnerFactory for DefaultRunnerFactory {
    fn get_runner(&self, source: &Path, settings: &Settings) -> Option<Arc<dyn TestRunner>> {
        if !is_executable(source) {
            tracing::debug!(source = %source.display(), "Source is not an executable");
            return None;
        }

        let supervisor = Arc::new(ProcessSupervisor::new(
            self.tree.clone(),
            settings.grace_period,
        ));
        Some(Arc::new(ExternalTestRunner::new(
            source,
            self.cache.get(source),
            supervisor,
        )))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .is_ok_and(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::{os::unix::fs::PermissionsExt, time::Duration};

    use super::*;
    use crate::native::process_tree::ProcfsProcessTree;

    fn factory() -> DefaultRunnerFactory {
        DefaultRunnerFactory::new(
            Arc::new(CapabilityCache::new()),
            Arc::new(ProcfsProcessTree::default()),
        )
    }

    fn write_script(dir: &Path, name: &str, script: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn test_only_executables_get_a_runner() {
        let dir = tempfile::tempdir().unwrap();
        let executable = write_script(dir.path(), "unit", "#!/bin/sh\nexit 0\n", 0o755);
        let plain = write_script(dir.path(), "notes.txt", "hello", 0o644);

        let factory = factory();
        let settings = Settings::default();
        let runner = factory.get_runner(&executable, &settings).unwrap();
        assert_eq!(runner.source(), executable);
        assert!(factory.get_runner(&plain, &settings).is_none());
        assert!(factory.get_runner(dir.path(), &settings).is_none());
    }

    #[test]
    fn test_capabilities_are_probed() {
        let dir = tempfile::tempdir().unwrap();
        let script = "#!/bin/sh\n# Lists the content of test tree - names of all test suites and test cases.\n\
# BOOST_TEST_LIST_CONTENT list_content\n# Prints Boost.Test version and exits.\nexit 0\n";
        let executable = write_script(dir.path(), "unit", script, 0o755);

        let runner = factory()
            .get_runner(&executable, &Settings::default())
            .unwrap();
        assert_eq!(
            runner.capabilities(),
            RunnerCapabilities {
                list_content: true,
                version: true,
            }
        );
    }

    #[tokio::test]
    async fn test_runner_passes_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let executable = write_script(
            dir.path(),
            "unit",
            "#!/bin/sh\nfor arg in \"$@\"; do echo \"$arg\"; done\nexit 1\n",
            0o755,
        );

        let runner = factory()
            .get_runner(&executable, &Settings::default())
            .unwrap();
        let args = CommandLineArgs {
            tests: vec!["Suite/A".to_string(), "Suite/B".to_string()],
            stdout_file: Some(dir.path().join("out.log")),
            catch_system_errors: Some(false),
            ..CommandLineArgs::default()
        };
        let settings = RunnerSettings {
            timeout: Some(Duration::from_secs(10)),
        };

        let code = runner
            .execute(&args, &settings, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(code, 1);

        let out = std::fs::read_to_string(dir.path().join("out.log")).unwrap();
        assert_eq!(out, "--run_test=Suite/A,B\n--catch_system_errors=no\n");
    }
}
