//! Stage domain model

use crate::core::{condition::StageCondition, context::RunContext};
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// An external process invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory, relative to the workspace root unless absolute
    pub cwd: Option<PathBuf>,
    /// Environment overlay on top of the run-level overlay
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Render placeholders, anchor `cwd` at the workspace and merge the run env.
    ///
    /// The result always has an absolute `cwd`.
    pub fn resolve(&self, stage: &str, ctx: &RunContext) -> Result<CommandSpec, PipelineError> {
        let program = ctx.render(&self.program, &format!("program of stage '{}'", stage))?;
        let args_location = format!("args of stage '{}'", stage);
        let args = self
            .args
            .iter()
            .map(|a| ctx.render(a, &args_location))
            .collect::<Result<Vec<_>, _>>()?;

        let cwd = match &self.cwd {
            Some(dir) => {
                let rendered = ctx.render(
                    &dir.to_string_lossy(),
                    &format!("cwd of stage '{}'", stage),
                )?;
                ctx.resolve_path(&PathBuf::from(rendered))
            }
            None => ctx.workspace.clone(),
        };

        let mut env = ctx.env.clone();
        let env_location = format!("env of stage '{}'", stage);
        for (key, value) in &self.env {
            env.insert(key.clone(), ctx.render(value, &env_location)?);
        }

        Ok(CommandSpec {
            program,
            args,
            cwd: Some(cwd),
            env,
        })
    }

    /// Single-line rendering for logs and dry-run listings
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Directory a patch stage rewrites
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub root: PathBuf,
}

impl PatchTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, stage: &str, ctx: &RunContext) -> Result<PatchTarget, PipelineError> {
        let rendered = ctx.render(
            &self.root.to_string_lossy(),
            &format!("patch root of stage '{}'", stage),
        )?;
        Ok(PatchTarget {
            root: ctx.resolve_path(&PathBuf::from(rendered)),
        })
    }
}

/// What a stage does when it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    Command(CommandSpec),
    /// In-process manifest patch pass using the pipeline's rule set
    Patch(PatchTarget),
}

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backoff {
    #[default]
    None,
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        base_ms: u64,
        #[serde(default = "default_max_backoff_ms")]
        max_ms: u64,
    },
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Backoff {
    /// Sleep before `attempt` (1-based). The first attempt never waits.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let ms = match *self {
            Backoff::None => 0,
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential { base_ms, max_ms } => 2u64
                .checked_pow(attempt - 2)
                .and_then(|factor| base_ms.checked_mul(factor))
                .unwrap_or(max_ms)
                .min(max_ms),
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub backoff: Backoff,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// What happens to the rest of the run when a stage fails for good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop dispatching; the run ends `aborted`
    #[default]
    AbortPipeline,
    /// Skip everything downstream, keep running independent branches
    SkipDependents,
    /// Record the failure and carry on
    Continue,
}

/// A single stage in a pipeline
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub action: StageAction,
    pub depends_on: Vec<String>,
    pub retry: RetryPolicy,
    pub on_failure: FailurePolicy,
    pub timeout_secs: Option<u64>,
    pub condition: Option<StageCondition>,
}

impl Stage {
    pub fn new(name: impl Into<String>, action: StageAction) -> Self {
        Self {
            name: name.into(),
            action,
            depends_on: Vec::new(),
            retry: RetryPolicy::default(),
            on_failure: FailurePolicy::default(),
            timeout_secs: None,
            condition: None,
        }
    }

    pub fn command(name: impl Into<String>, spec: CommandSpec) -> Self {
        Self::new(name, StageAction::Command(spec))
    }

    pub fn patch(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self::new(name, StageAction::Patch(PatchTarget::new(root)))
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn when(mut self, condition: StageCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn is_patch(&self) -> bool {
        matches!(self.action, StageAction::Patch(_))
    }

    /// Structural checks that do not need the rest of the graph
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |reason: &str| PipelineError::InvalidStage {
            stage: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("stage name is empty"));
        }
        if let StageAction::Command(spec) = &self.action {
            if spec.program.trim().is_empty() {
                return Err(invalid("program is empty"));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.timeout_secs == Some(0) {
            return Err(invalid("timeout must be greater than zero"));
        }
        if self.depends_on.iter().any(|d| d == &self.name) {
            return Err(PipelineError::CycleDetected {
                cycle: vec![self.name.clone()],
            });
        }
        Ok(())
    }

    /// Copy with every template rendered and every path made absolute
    pub fn resolve(&self, ctx: &RunContext) -> Result<Stage, PipelineError> {
        let action = match &self.action {
            StageAction::Command(spec) => StageAction::Command(spec.resolve(&self.name, ctx)?),
            StageAction::Patch(target) => StageAction::Patch(target.resolve(&self.name, ctx)?),
        };
        Ok(Stage {
            action,
            ..self.clone()
        })
    }
}
