use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use uuid::Uuid;

use crate::core::{
    args::CommandLineArgs,
    domain::TestCase,
    settings::{RunnerSettings, Settings, Strategy},
    traits::runner::{RunnerFactory, TestRunner},
};

/// A single supervised runner invocation and the tests it is expected to
/// report on.
#[derive(Clone, Debug)]
pub struct TestRun {
    pub id: Uuid,
    pub runner: Arc<dyn TestRunner>,
    pub tests: Vec<TestCase>,
    pub arguments: CommandLineArgs,
    pub settings: RunnerSettings,
}

impl TestRun {
    pub fn new(
        runner: Arc<dyn TestRunner>,
        tests: Vec<TestCase>,
        arguments: CommandLineArgs,
        settings: RunnerSettings,
    ) -> Self {
        TestRun {
            id: Uuid::new_v4(),
            runner,
            tests,
            arguments,
            settings,
        }
    }

    pub fn source(&self) -> PathBuf {
        self.runner.source()
    }
}

/// Builds the base arguments of every invocation for a source module.
pub type ArgsBuilder = Arc<dyn Fn(&Path) -> CommandLineArgs + Send + Sync>;

/// Splits a test selection into runner invocations.
///
/// The union of the produced runs equals the input minus tests whose source
/// has no runner.
pub trait TestBatchStrategy: Send + Sync {
    fn batch_tests(&self, tests: &[TestCase]) -> Vec<TestRun>;
}

/// What every strategy needs to turn a group of tests into a [`TestRun`].
#[derive(Clone)]
pub struct BatchContext {
    factory: Arc<dyn RunnerFactory>,
    settings: Settings,
    args: ArgsBuilder,
}

impl BatchContext {
    pub fn new(factory: Arc<dyn RunnerFactory>, settings: Settings, args: ArgsBuilder) -> Self {
        BatchContext {
            factory,
            settings,
            args,
        }
    }

    fn runner(&self, source: &Path) -> Option<Arc<dyn TestRunner>> {
        let runner = self.factory.get_runner(source, &self.settings);
        if runner.is_none() {
            tracing::warn!(source = %source.display(), "No runner available, skipping its tests");
        }
        runner
    }

    /// Arguments selecting `tests`. Unless `capture` is set, output capture
    /// and leak detection are stripped since a batch of several tests cannot
    /// attribute them to a single test.
    fn arguments(&self, source: &Path, tests: Option<&[TestCase]>, capture: bool) -> CommandLineArgs {
        let mut args = (self.args)(source);
        if let Some(tests) = tests {
            args.tests = tests.iter().map(|test| test.path.clone()).collect();
        }
        if !capture {
            args.stdout_file = None;
            args.stderr_file = None;
            args.detect_memory_leaks = 0;
        }
        args
    }

    fn run(&self, runner: Arc<dyn TestRunner>, tests: Vec<TestCase>, arguments: CommandLineArgs) -> TestRun {
        let run = TestRun::new(runner, tests, arguments, self.settings.runner);
        tracing::debug!(
            batch = %run.id,
            source = %run.source().display(),
            tests = run.tests.len(),
            arguments = %run.arguments,
            "Planned batch"
        );
        run
    }
}

/// One run per source module.
pub struct SourceStrategy {
    ctx: BatchContext,
}

impl SourceStrategy {
    pub fn new(ctx: BatchContext) -> Self {
        Self { ctx }
    }
}

impl TestBatchStrategy for SourceStrategy {
    fn batch_tests(&self, tests: &[TestCase]) -> Vec<TestRun> {
        group_by(tests, |test| test.source.clone())
            .into_iter()
            .filter_map(|(source, tests)| {
                let runner = self.ctx.runner(&source)?;
                let args = self.ctx.arguments(&source, Some(&tests), false);
                Some(self.ctx.run(runner, tests, args))
            })
            .collect()
    }
}

/// One run per source module and parent test suite.
pub struct TestSuiteStrategy {
    ctx: BatchContext,
}

impl TestSuiteStrategy {
    pub fn new(ctx: BatchContext) -> Self {
        Self { ctx }
    }
}

impl TestBatchStrategy for TestSuiteStrategy {
    fn batch_tests(&self, tests: &[TestCase]) -> Vec<TestRun> {
        let mut runs = Vec::new();
        for (source, tests) in group_by(tests, |test| test.source.clone()) {
            let Some(runner) = self.ctx.runner(&source) else {
                continue;
            };

            for (_, suite) in group_by(&tests, |test| test.parent_suite().map(str::to_string)) {
                let args = self.ctx.arguments(&source, Some(&suite), false);
                runs.push(self.ctx.run(runner.clone(), suite, args));
            }
        }
        runs
    }
}

/// One run per test case, the only strategy which captures output.
pub struct IndividualStrategy {
    ctx: BatchContext,
}

impl IndividualStrategy {
    pub fn new(ctx: BatchContext) -> Self {
        Self { ctx }
    }
}

impl TestBatchStrategy for IndividualStrategy {
    fn batch_tests(&self, tests: &[TestCase]) -> Vec<TestRun> {
        let mut runs = Vec::new();
        for (source, tests) in group_by(tests, |test| test.source.clone()) {
            let Some(runner) = self.ctx.runner(&source) else {
                continue;
            };

            for test in tests {
                let tests = vec![test];
                let args = self.ctx.arguments(&source, Some(&tests), true);
                runs.push(self.ctx.run(runner.clone(), tests, args));
            }
        }
        runs
    }
}

/// One unfiltered run per source module: the runner executes its whole test
/// tree and results for tests outside the selection are discarded.
pub struct OneShotStrategy {
    ctx: BatchContext,
}

impl OneShotStrategy {
    pub fn new(ctx: BatchContext) -> Self {
        Self { ctx }
    }
}

impl TestBatchStrategy for OneShotStrategy {
    fn batch_tests(&self, tests: &[TestCase]) -> Vec<TestRun> {
        group_by(tests, |test| test.source.clone())
            .into_iter()
            .filter_map(|(source, tests)| {
                let runner = self.ctx.runner(&source)?;
                let args = self.ctx.arguments(&source, None, false);
                Some(self.ctx.run(runner, tests, args))
            })
            .collect()
    }
}

pub fn strategy_for(strategy: Strategy, ctx: BatchContext) -> Box<dyn TestBatchStrategy> {
    match strategy {
        Strategy::Source => Box::new(SourceStrategy::new(ctx)),
        Strategy::TestSuite => Box::new(TestSuiteStrategy::new(ctx)),
        Strategy::TestCase => Box::new(IndividualStrategy::new(ctx)),
        Strategy::One => Box::new(OneShotStrategy::new(ctx)),
    }
}

/// Groups tests by `key`, keeping groups and their members in order of first
/// appearance.
fn group_by<K, F>(tests: &[TestCase], key: F) -> Vec<(K, Vec<TestCase>)>
where
    K: PartialEq,
    F: Fn(&TestCase) -> K,
{
    let mut groups: Vec<(K, Vec<TestCase>)> = Vec::new();
    for test in tests {
        let k = key(test);
        match groups.iter_mut().find(|(group, _)| *group == k) {
            Some((_, members)) => members.push(test.clone()),
            None => groups.push((k, vec![test.clone()])),
        }
    }
    groups
}
