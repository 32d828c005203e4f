//! Stage graph - validated, topologically ordered stages

use crate::core::stage::Stage;
use crate::error::PipelineError;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Immutable, acyclic set of stages in run order
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    /// Stages in topological order
    stages: Vec<Stage>,
    /// Stage name -> position in `stages`
    index: HashMap<String, usize>,
}

impl StageGraph {
    /// Validate and order stages.
    ///
    /// Kahn's algorithm; among stages that are ready at the same time the one
    /// declared first runs first, so the order is reproducible.
    pub fn build(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        let mut declared: HashMap<&str, usize> = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            stage.validate()?;
            if declared.insert(stage.name.as_str(), i).is_some() {
                return Err(PipelineError::DuplicateStage(stage.name.clone()));
            }
        }

        let mut in_degree = vec![0usize; stages.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
        for (i, stage) in stages.iter().enumerate() {
            let unique: HashSet<&str> = stage.depends_on.iter().map(String::as_str).collect();
            for dep in unique {
                let Some(&d) = declared.get(dep) else {
                    return Err(PipelineError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.to_string(),
                    });
                };
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..stages.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(stages.len());
        while let Some(i) = ready.pop_first() {
            order.push(i);
            for &next in &dependents[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() < stages.len() {
            let cycle = (0..stages.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| stages[i].name.clone())
                .collect();
            return Err(PipelineError::CycleDetected { cycle });
        }

        let mut slots: Vec<Option<Stage>> = stages.into_iter().map(Some).collect();
        let ordered: Vec<Stage> = order.into_iter().filter_map(|i| slots[i].take()).collect();
        let index = ordered
            .iter()
            .enumerate()
            .map(|(pos, s)| (s.name.clone(), pos))
            .collect();

        Ok(Self {
            stages: ordered,
            index,
        })
    }

    /// Stages in run order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.index.get(name).map(|&i| &self.stages[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Every stage that depends on `name`, directly or transitively, in run order
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let mut affected: HashSet<&str> = HashSet::new();
        affected.insert(name);
        let mut result = Vec::new();
        // Run order guarantees dependencies are seen before dependents
        for stage in &self.stages {
            if stage.name != name
                && stage.depends_on.iter().any(|d| affected.contains(d.as_str()))
            {
                affected.insert(stage.name.as_str());
                result.push(stage.name.as_str());
            }
        }
        result
    }

    /// Whether `a` and `b` have no dependency path between them in either direction
    pub fn independent(&self, a: &str, b: &str) -> bool {
        a != b && !self.dependents_of(a).contains(&b) && !self.dependents_of(b).contains(&a)
    }
}
