//! Pipeline configuration from YAML

use crate::core::{
    condition::StageCondition,
    graph::StageGraph,
    rule::{PatchRule, PatchRuleSet, DEFAULT_SCOPE},
    stage::{CommandSpec, FailurePolicy, RetryPolicy, Stage, StageAction, PatchTarget},
    Pipeline,
};
use crate::error::PipelineError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Top-level pipeline definition loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Workspace root, relative to the definition file
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    /// Variables for `{{ var }}` rendering and `when` conditions
    #[serde(default)]
    variables: HashMap<String, Value>,

    /// Environment overlay applied to every command stage
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub settings: Settings,

    /// Manifest patch rules, applied in order
    #[serde(default)]
    pub patches: Vec<PatchRuleConfig>,

    pub stages: Vec<StageConfig>,

    /// Directory of the file this was loaded from
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

/// Run-wide switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Fail patch stages on any per-file error
    #[serde(default)]
    pub strict: bool,

    /// Keep `.repoforge.bak` copies of rewritten files
    #[serde(default)]
    pub backup: bool,

    /// Run up to this many independent stages at once (1 = sequential)
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Timeout for stages that do not set one
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRuleConfig {
    /// Defaults to `rule-<n>` (1-based position)
    #[serde(default)]
    pub id: Option<String>,

    #[serde(rename = "match")]
    pub pattern: String,

    pub replace: String,

    /// File glob relative to the patch root
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub use_regex: bool,
}

/// Stage as written in YAML. Exactly one of `program` and `patch` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub patch: Option<PatchTargetConfig>,

    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    #[serde(default)]
    pub on_failure: FailurePolicy,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Variable gating the stage; `"!var"` negates
    #[serde(default)]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchTargetConfig {
    pub root: PathBuf,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline definition {}", path.display()))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Invalid pipeline definition {}", path.display()))?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Pipeline name is empty");
        }

        for (key, value) in &self.variables {
            if matches!(value, Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_)) {
                anyhow::bail!("Variable '{}' must be a scalar value", key);
            }
        }

        for stage in &self.stages {
            match (&stage.program, &stage.patch) {
                (Some(_), Some(_)) => anyhow::bail!(
                    "Stage '{}' sets both 'program' and 'patch'",
                    stage.name
                ),
                (None, None) => anyhow::bail!(
                    "Stage '{}' needs either 'program' or 'patch'",
                    stage.name
                ),
                (None, Some(_)) if !stage.args.is_empty() || !stage.env.is_empty() => {
                    anyhow::bail!(
                        "Stage '{}' is a patch stage and cannot take args or env",
                        stage.name
                    )
                }
                _ => {}
            }
        }

        let rules = self.rule_set()?;
        let graph = self.stage_graph()?;

        if graph.stages().iter().any(Stage::is_patch) && rules.is_empty() {
            anyhow::bail!("Pipeline has a patch stage but no patch rules");
        }

        Ok(())
    }

    /// Variables rendered as strings
    pub fn variables(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Null => String::new(),
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }

    /// Build the ordered rule set
    pub fn rule_set(&self) -> Result<PatchRuleSet, PipelineError> {
        let mut rules = PatchRuleSet::new();
        for (i, rule) in self.patches.iter().enumerate() {
            let id = rule.id.clone().unwrap_or_else(|| format!("rule-{}", i + 1));
            let scope = rule.scope.as_deref().unwrap_or(DEFAULT_SCOPE);
            let built = if rule.use_regex {
                PatchRule::regex(id, &rule.pattern, rule.replace.clone(), scope)?
            } else {
                PatchRule::literal(id, rule.pattern.clone(), rule.replace.clone(), scope)?
            };
            rules.add(built)?;
        }
        Ok(rules)
    }

    /// Build and validate the stage graph
    pub fn stage_graph(&self) -> Result<StageGraph, PipelineError> {
        let stages = self
            .stages
            .iter()
            .map(StageConfig::to_stage)
            .collect::<Result<Vec<_>, _>>()?;
        StageGraph::build(stages)
    }

    /// Workspace root: the `workspace` key resolved against the definition file
    pub fn workspace_dir(&self) -> Option<PathBuf> {
        let workspace = self.workspace.as_ref()?;
        if workspace.is_absolute() {
            return Some(workspace.clone());
        }
        Some(match &self.base_dir {
            Some(base) => base.join(workspace),
            None => workspace.clone(),
        })
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, PipelineError> {
        Pipeline::from_config(self)
    }
}

impl StageConfig {
    fn to_stage(&self) -> Result<Stage, PipelineError> {
        let action = match (&self.program, &self.patch) {
            (Some(program), None) => {
                let mut spec = CommandSpec::new(program.clone()).args(self.args.iter().cloned());
                spec.cwd = self.cwd.clone();
                spec.env = self.env.clone();
                StageAction::Command(spec)
            }
            (None, Some(patch)) => StageAction::Patch(PatchTarget::new(patch.root.clone())),
            _ => {
                return Err(PipelineError::InvalidStage {
                    stage: self.name.clone(),
                    reason: "exactly one of 'program' and 'patch' must be set".to_string(),
                })
            }
        };

        let condition = match &self.when {
            Some(expr) => Some(StageCondition::parse(expr).ok_or_else(|| {
                PipelineError::InvalidStage {
                    stage: self.name.clone(),
                    reason: format!("invalid condition '{}'", expr),
                }
            })?),
            None => None,
        };

        Ok(Stage {
            name: self.name.clone(),
            action,
            depends_on: self.depends_on.clone(),
            retry: self.retry.unwrap_or_default(),
            on_failure: self.on_failure,
            timeout_secs: self.timeout_secs,
            condition,
        })
    }
}
