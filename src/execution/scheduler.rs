//! Execution scheduler - determines which stages to run next

use crate::core::stage::{Stage, StageAction};
use crate::core::state::StageStatus;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

/// Strategy for scheduling stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute stages in topological order, one at a time
    #[default]
    Sequential,

    /// Up to N independent stages at once, if their footprints do not overlap
    Parallel(usize),
}

impl SchedulingStrategy {
    /// `max_parallel` of 0 or 1 means sequential
    pub fn from_max_parallel(max_parallel: usize) -> Self {
        if max_parallel > 1 {
            SchedulingStrategy::Parallel(max_parallel)
        } else {
            SchedulingStrategy::Sequential
        }
    }
}

/// What a stage may touch: its working directory and its own environment keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footprint {
    pub dir: Option<PathBuf>,
    pub env_keys: BTreeSet<String>,
}

impl Footprint {
    /// Footprint of a resolved stage.
    ///
    /// Keys inherited unchanged from the run-level overlay are shared by every
    /// stage and do not count.
    pub fn of(stage: &Stage, run_env: &BTreeMap<String, String>) -> Self {
        match &stage.action {
            StageAction::Command(spec) => Self {
                dir: spec.cwd.clone(),
                env_keys: spec
                    .env
                    .iter()
                    .filter(|(k, v)| run_env.get(*k) != Some(*v))
                    .map(|(k, _)| k.clone())
                    .collect(),
            },
            StageAction::Patch(target) => Self {
                dir: Some(target.root.clone()),
                env_keys: BTreeSet::new(),
            },
        }
    }

    /// Nested or equal directories, or a shared env key
    pub fn overlaps(&self, other: &Footprint) -> bool {
        let dirs = match (&self.dir, &other.dir) {
            (Some(a), Some(b)) => a.starts_with(b) || b.starts_with(a),
            _ => false,
        };
        dirs || !self.env_keys.is_disjoint(&other.env_keys)
    }
}

/// Picks the next wave of stages
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Indices into `stages` (run order) of the next wave.
    ///
    /// A stage is ready when it is pending and every dependency has reached a
    /// terminal status. The first pending stage in run order is always ready,
    /// so a non-empty result is returned while anything is pending.
    pub fn next_batch(
        &self,
        stages: &[Stage],
        statuses: &HashMap<String, StageStatus>,
        footprints: &[Footprint],
    ) -> Vec<usize> {
        let is_pending = |s: &Stage| {
            statuses
                .get(&s.name)
                .map_or(true, |st| *st == StageStatus::Pending)
        };
        let is_ready = |s: &Stage| {
            is_pending(s)
                && s.depends_on.iter().all(|d| {
                    statuses.get(d).is_some_and(StageStatus::is_terminal)
                })
        };

        match self.strategy {
            SchedulingStrategy::Sequential => stages
                .iter()
                .position(is_pending)
                .into_iter()
                .collect(),
            SchedulingStrategy::Parallel(max) => {
                let mut batch: Vec<usize> = Vec::new();
                for (i, stage) in stages.iter().enumerate() {
                    if batch.len() >= max.max(1) {
                        break;
                    }
                    if !is_ready(stage) {
                        continue;
                    }
                    if batch.iter().any(|&j| footprints[j].overlaps(&footprints[i])) {
                        continue;
                    }
                    batch.push(i);
                }
                batch
            }
        }
    }
}
