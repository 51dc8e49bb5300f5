use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What to do with the rest of the plan when a step fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the plan; remaining steps never run.
    Abort,
    /// Record the failure and keep going.
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub steps: Vec<StepReport>,
    pub aborted: bool,
}

impl StartupReport {
    pub fn succeeded(&self) -> bool {
        !self.aborted
            && self
                .steps
                .iter()
                .all(|step| step.outcome == StepOutcome::Succeeded)
    }
}

/// One ordered startup task: wait for a dependency, seed data, build an
/// index. Replaces exit-code chaining of deployment scripts with structured
/// results.
#[async_trait]
pub trait StartupStep: Send + Sync {
    fn name(&self) -> &str;

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::Abort
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    async fn run(&self) -> anyhow::Result<()>;
}

pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Closure-backed step for callers that do not want a dedicated type per
/// task.
pub struct FnStep {
    name: String,
    policy: FailurePolicy,
    timeout: Duration,
    action: Box<dyn Fn() -> StepFuture + Send + Sync>,
}

impl FnStep {
    pub fn boxed(
        name: impl Into<String>,
        policy: FailurePolicy,
        timeout: Duration,
        action: impl Fn() -> StepFuture + Send + Sync + 'static,
    ) -> Box<dyn StartupStep> {
        Box::new(Self {
            name: name.into(),
            policy,
            timeout,
            action: Box::new(action),
        })
    }
}

#[async_trait]
impl StartupStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn policy(&self) -> FailurePolicy {
        self.policy
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self) -> anyhow::Result<()> {
        (self.action)().await
    }
}

/// Run the steps in order, bounding each with its own timeout.
pub async fn run_startup(steps: &[Box<dyn StartupStep>]) -> StartupReport {
    let mut report = StartupReport::default();

    for step in steps {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(step.timeout(), step.run()).await {
            Ok(Ok(())) => StepOutcome::Succeeded,
            Ok(Err(error)) => StepOutcome::Failed(error.to_string()),
            Err(_) => StepOutcome::TimedOut,
        };
        let elapsed = started.elapsed();

        match &outcome {
            StepOutcome::Succeeded => info!(step = step.name(), ?elapsed, "startup step done"),
            StepOutcome::Failed(message) => {
                warn!(step = step.name(), error = %message, "startup step failed")
            }
            StepOutcome::TimedOut => warn!(step = step.name(), "startup step timed out"),
        }

        let failed = outcome != StepOutcome::Succeeded;
        report.steps.push(StepReport {
            name: step.name().to_string(),
            outcome,
            elapsed,
        });

        if failed && step.policy() == FailurePolicy::Abort {
            report.aborted = true;
            break;
        }
    }

    report
}
