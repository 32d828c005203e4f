//! Pipeline domain model

use crate::core::{
    config::{PipelineConfig, Settings},
    context::RunContext,
    graph::StageGraph,
    rule::PatchRuleSet,
    stage::Stage,
};
use crate::error::PipelineError;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// A validated pipeline definition: frozen rules plus an ordered stage graph
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,

    /// Rule set shared by every patch stage
    pub rules: Arc<PatchRuleSet>,

    pub graph: StageGraph,

    /// Definition variables, before command-line overrides
    pub variables: HashMap<String, String>,

    pub env: BTreeMap<String, String>,

    pub settings: Settings,

    /// Workspace from the definition, if it names one
    pub workspace: Option<PathBuf>,
}

/// Everything a run needs, rendered against a [`RunContext`] up front so
/// that template and condition errors surface before any side effect.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub rules: Arc<PatchRuleSet>,
    /// Resolved stages in run order
    pub stages: Vec<Stage>,
    /// Condition outcome per gated stage
    pub conditions: HashMap<String, bool>,
}

impl PreparedRun {
    pub fn condition_met(&self, stage: &str) -> bool {
        self.conditions.get(stage).copied().unwrap_or(true)
    }
}

impl Pipeline {
    pub fn new(name: impl Into<String>, rules: PatchRuleSet, graph: StageGraph) -> Self {
        Self {
            name: name.into(),
            rules: Arc::new(rules),
            graph,
            variables: HashMap::new(),
            env: BTreeMap::new(),
            settings: Settings::default(),
            workspace: None,
        }
    }

    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            name: config.name.clone(),
            rules: Arc::new(config.rule_set()?),
            graph: config.stage_graph()?,
            variables: config.variables(),
            env: config.env.clone(),
            settings: config.settings.clone(),
            workspace: config.workspace_dir(),
        })
    }

    /// Build the run context for a workspace, seeded from the definition
    pub fn context(&self, workspace: impl Into<PathBuf>) -> RunContext {
        let mut ctx = RunContext::new(workspace)
            .with_variables(self.variables.clone())
            .strict(self.settings.strict)
            .backup(self.settings.backup)
            .with_default_timeout(self.settings.default_timeout_secs);
        ctx.env = self.env.clone();
        ctx
    }

    /// Render rules and stages and evaluate conditions.
    ///
    /// Fails with `UndefinedVariable` for a placeholder or `when` variable
    /// that has no value.
    pub fn prepare(&self, ctx: &RunContext) -> Result<PreparedRun, PipelineError> {
        let rules = Arc::new(self.rules.render(ctx)?);

        let mut stages = Vec::with_capacity(self.graph.len());
        let mut conditions = HashMap::new();
        for stage in self.graph.stages() {
            if let Some(condition) = &stage.condition {
                let met = condition.evaluate(&ctx.variables).ok_or_else(|| {
                    PipelineError::UndefinedVariable {
                        name: condition.variable.clone(),
                        location: format!("condition of stage '{}'", stage.name),
                    }
                })?;
                conditions.insert(stage.name.clone(), met);
            }
            stages.push(stage.resolve(ctx)?);
        }

        Ok(PreparedRun {
            rules,
            stages,
            conditions,
        })
    }
}
