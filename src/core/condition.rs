//! Stage run conditions resolved from pipeline variables

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `when: name` runs the stage if `name` is truthy; `when: "!name"` if it is not
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCondition {
    pub variable: String,
    pub negated: bool,
}

impl StageCondition {
    pub fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        let (negated, name) = match expr.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, expr),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            variable: name.to_string(),
            negated,
        })
    }

    /// `None` when the variable is not defined
    pub fn evaluate(&self, variables: &HashMap<String, String>) -> Option<bool> {
        variables
            .get(&self.variable)
            .map(|value| is_truthy(value) != self.negated)
    }
}

impl std::fmt::Display for StageCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negated {
            write!(f, "!{}", self.variable)
        } else {
            f.write_str(&self.variable)
        }
    }
}

/// Answers accepted as "yes"
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "1"
    )
}
