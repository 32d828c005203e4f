//! Run context - the explicit configuration threaded through a run

use crate::error::PipelineError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Placeholder that renders to the workspace root unless a variable overrides it
pub const WORKSPACE_VARIABLE: &str = "workspace";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Execution context for a pipeline run
///
/// Holds everything a stage may depend on: the workspace root, resolved
/// variables, the environment overlay shared by all stages and the run
/// switches. Nothing in the engine reads process-global state instead.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Workspace root; relative stage paths resolve against it
    pub workspace: PathBuf,

    /// Definition variables merged with command-line overrides
    pub variables: HashMap<String, String>,

    /// Environment applied to every command stage, beneath the stage's own env
    pub env: BTreeMap<String, String>,

    /// Report what would change without writing files or running commands
    pub dry_run: bool,

    /// Fail patch stages that recorded any per-file error
    pub strict: bool,

    /// Keep a `.repoforge.bak` copy of each file before its first rewrite
    pub backup: bool,

    /// Timeout for stages that do not set their own
    pub default_timeout_secs: Option<u64>,
}

impl RunContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            variables: HashMap::new(),
            env: BTreeMap::new(),
            dry_run: false,
            strict: false,
            backup: false,
            default_timeout_secs: None,
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_variables<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variables
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_default_timeout(mut self, secs: Option<u64>) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// Variable value, with `workspace` falling back to the workspace root
    fn lookup(&self, name: &str) -> Option<String> {
        match self.variables.get(name) {
            Some(value) => Some(value.clone()),
            None if name == WORKSPACE_VARIABLE => Some(self.workspace.display().to_string()),
            None => None,
        }
    }

    /// Substitute `{{ name }}` placeholders.
    ///
    /// `location` names the field being rendered and only appears in the
    /// error when a placeholder has no value.
    pub fn render(&self, template: &str, location: &str) -> Result<String, PipelineError> {
        let regex = placeholder_regex();
        if !regex.is_match(template) {
            return Ok(template.to_string());
        }

        let mut missing = None;
        let rendered = regex.replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            match self.lookup(name) {
                Some(value) => value,
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(PipelineError::UndefinedVariable {
                name,
                location: location.to_string(),
            }),
            None => Ok(rendered.into_owned()),
        }
    }

    /// Resolve a possibly relative path against the workspace root
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }
}
