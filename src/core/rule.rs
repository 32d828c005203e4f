//! Patch rules - ordered, idempotent text substitutions scoped by file glob

use crate::core::context::RunContext;
use crate::error::PipelineError;
use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use std::borrow::Cow;

/// Scope used when a rule does not name one
pub const DEFAULT_SCOPE: &str = "**";

/// How a rule finds the text it replaces
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    /// Exact substring match
    Literal(String),
    /// Regular expression; the replacement may use `$1`/`${name}` captures
    Regex(Regex),
}

impl RuleMatcher {
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            RuleMatcher::Literal(pattern) => text.contains(pattern.as_str()),
            RuleMatcher::Regex(regex) => regex.is_match(text),
        }
    }

    /// Replace every occurrence, borrowing the input when nothing matched
    pub fn replace_all<'a>(&self, text: &'a str, replacement: &str) -> Cow<'a, str> {
        match self {
            RuleMatcher::Literal(pattern) => {
                if text.contains(pattern.as_str()) {
                    Cow::Owned(text.replace(pattern.as_str(), replacement))
                } else {
                    Cow::Borrowed(text)
                }
            }
            RuleMatcher::Regex(regex) => regex.replace_all(text, replacement),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RuleMatcher::Literal(pattern) => pattern,
            RuleMatcher::Regex(regex) => regex.as_str(),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, RuleMatcher::Regex(_))
    }
}

/// A single substitution rule
#[derive(Debug, Clone)]
pub struct PatchRule {
    id: String,
    matcher: RuleMatcher,
    replacement: String,
    scope: String,
    scope_matcher: GlobMatcher,
}

impl PatchRule {
    /// Literal substring rule.
    ///
    /// Rejected when the replacement contains the pattern, since a second
    /// pass would substitute again.
    pub fn literal(
        id: impl Into<String>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
        scope: &str,
    ) -> Result<Self, PipelineError> {
        let id = id.into();
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(PipelineError::invalid_rule(&id, "match pattern is empty"));
        }
        Self::build(id, RuleMatcher::Literal(pattern), replacement.into(), scope)
    }

    /// Regular expression rule. Idempotence is checked per file when applied.
    pub fn regex(
        id: impl Into<String>,
        pattern: &str,
        replacement: impl Into<String>,
        scope: &str,
    ) -> Result<Self, PipelineError> {
        let id = id.into();
        if pattern.is_empty() {
            return Err(PipelineError::invalid_rule(&id, "match pattern is empty"));
        }
        let regex = Regex::new(pattern)
            .map_err(|e| PipelineError::invalid_rule(&id, format!("invalid regex: {}", e)))?;
        Self::build(id, RuleMatcher::Regex(regex), replacement.into(), scope)
    }

    fn build(
        id: String,
        matcher: RuleMatcher,
        replacement: String,
        scope: &str,
    ) -> Result<Self, PipelineError> {
        if id.trim().is_empty() {
            return Err(PipelineError::invalid_rule(&id, "rule id is empty"));
        }

        if let RuleMatcher::Literal(pattern) = &matcher {
            if replacement.contains(pattern.as_str()) {
                return Err(PipelineError::invalid_rule(
                    &id,
                    format!(
                        "replacement '{}' contains the match text '{}' and would not be idempotent",
                        replacement, pattern
                    ),
                ));
            }
        }

        let scope_matcher = GlobBuilder::new(scope)
            .literal_separator(true)
            .build()
            .map_err(|e| PipelineError::invalid_rule(&id, format!("invalid scope glob: {}", e)))?
            .compile_matcher();

        Ok(Self {
            id,
            matcher,
            replacement,
            scope: scope.to_string(),
            scope_matcher,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether the rule applies to a path relative to the patch root (`/`-separated)
    pub fn in_scope(&self, relative_path: &str) -> bool {
        self.scope_matcher.is_match(relative_path)
    }

    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        self.matcher.replace_all(text, &self.replacement)
    }

    /// Copy of this rule with `{{ var }}` placeholders in the replacement resolved
    fn rendered(&self, ctx: &RunContext) -> Result<Self, PipelineError> {
        let location = format!("replacement of rule '{}'", self.id);
        let replacement = ctx.render(&self.replacement, &location)?;
        match &self.matcher {
            RuleMatcher::Literal(pattern) => {
                Self::literal(self.id.clone(), pattern.clone(), replacement, &self.scope)
            }
            RuleMatcher::Regex(_) => Self::build(
                self.id.clone(),
                self.matcher.clone(),
                replacement,
                &self.scope,
            ),
        }
    }
}

/// Ordered, append-only collection of patch rules
#[derive(Debug, Clone, Default)]
pub struct PatchRuleSet {
    rules: Vec<PatchRule>,
}

impl PatchRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Rule ids must be unique within the set.
    pub fn add(&mut self, rule: PatchRule) -> Result<(), PipelineError> {
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(PipelineError::invalid_rule(&rule.id, "duplicate rule id"));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[PatchRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule's scope covers the path
    pub fn covers(&self, relative_path: &str) -> bool {
        self.rules.iter().any(|r| r.in_scope(relative_path))
    }

    /// Fold the in-scope rules over `content` in declaration order.
    ///
    /// Returns the final text and the ids of the rules that changed it.
    pub fn apply(&self, relative_path: &str, content: &str) -> (String, Vec<String>) {
        let mut current = content.to_string();
        let mut applied = Vec::new();

        for rule in self.rules.iter().filter(|r| r.in_scope(relative_path)) {
            if let Cow::Owned(next) = rule.apply(&current) {
                if next != current {
                    applied.push(rule.id.clone());
                    current = next;
                }
            }
        }

        (current, applied)
    }

    /// Resolve `{{ var }}` placeholders in every replacement
    pub fn render(&self, ctx: &RunContext) -> Result<PatchRuleSet, PipelineError> {
        let rules = self
            .rules
            .iter()
            .map(|r| r.rendered(ctx))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PatchRuleSet { rules })
    }
}
