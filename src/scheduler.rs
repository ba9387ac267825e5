//! Dependency scheduler.
//!
//! A [`PhasePlan`] is the validated phase configuration for one run: phase
//! numbers are unique, every dependency names a declared phase and the
//! dependency graph is acyclic. [`PhasePlan::next_eligible_phase`] picks the
//! single next phase to run. Phases are never reordered and never run
//! concurrently.

use crate::errors::PlanError;
use crate::phase::PhaseConfig;
use crate::state::{PhaseStatus, StateStore};
use std::collections::BTreeMap;

/// Why the pipeline cannot make progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The phase failed and retry was not requested.
    Failed,
    /// The phase is recorded as running.
    InProgress,
    /// The phase is pending but these dependencies are not completed.
    WaitingOn(Vec<u32>),
}

/// Scheduler verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Ready(u32),
    /// Every phase in the plan is completed.
    Complete,
    /// Nothing can run; `phase` is the lowest phase that is not completed.
    Blocked { phase: u32, reason: BlockReason },
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Eligibility::Ready(phase) => write!(f, "next: phase {}", phase),
            Eligibility::Complete => write!(f, "complete"),
            Eligibility::Blocked { phase, reason } => {
                write!(f, "blocked on phase {}", phase)?;
                match reason {
                    BlockReason::Failed => write!(f, " (failed)"),
                    BlockReason::InProgress => write!(f, " (in progress)"),
                    BlockReason::WaitingOn(deps) => {
                        let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
                        write!(f, " (waiting on {})", deps.join(", "))
                    }
                }
            }
        }
    }
}

/// Validated, ordered phase configuration.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    phases: Vec<PhaseConfig>,
    index: BTreeMap<u32, usize>,
}

impl PhasePlan {
    /// Validate the phases and sort them by number.
    pub fn new(mut phases: Vec<PhaseConfig>) -> Result<Self, PlanError> {
        phases.sort_by_key(|p| p.phase);

        let mut index = BTreeMap::new();
        for (i, phase) in phases.iter().enumerate() {
            if index.insert(phase.phase, i).is_some() {
                return Err(PlanError::DuplicatePhase(phase.phase));
            }
        }

        for phase in &phases {
            for dep in &phase.dependencies {
                if !index.contains_key(dep) {
                    return Err(PlanError::UnknownDependency {
                        phase: phase.phase,
                        dependency: *dep,
                    });
                }
            }
        }

        let plan = Self { phases, index };
        if let Some(cycle) = plan.find_cycle() {
            return Err(PlanError::DependencyCycle(cycle));
        }
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, phase: u32) -> Option<&PhaseConfig> {
        self.index.get(&phase).map(|&i| &self.phases[i])
    }

    /// Phases sorted by number.
    pub fn order(&self) -> impl Iterator<Item = &PhaseConfig> {
        self.phases.iter()
    }

    pub fn phases(&self) -> &[PhaseConfig] {
        &self.phases
    }

    /// Dependencies of `phase` whose status is not `completed`.
    pub fn unmet_dependencies(&self, phase: &PhaseConfig, store: &StateStore) -> Vec<u32> {
        phase
            .dependencies
            .iter()
            .copied()
            .filter(|dep| store.get_phase_status(*dep) != PhaseStatus::Completed)
            .collect()
    }

    /// The lowest pending phase (or failed phase, when `retry_failed`) whose
    /// dependencies are all completed.
    pub fn next_eligible_phase(&self, store: &StateStore, retry_failed: bool) -> Eligibility {
        for phase in &self.phases {
            let status = store.get_phase_status(phase.phase);
            let candidate = status == PhaseStatus::Pending
                || (retry_failed && status == PhaseStatus::Failed);
            if candidate && self.unmet_dependencies(phase, store).is_empty() {
                return Eligibility::Ready(phase.phase);
            }
        }

        let blocker = self
            .phases
            .iter()
            .find(|p| store.get_phase_status(p.phase) != PhaseStatus::Completed);

        match blocker {
            None => Eligibility::Complete,
            Some(phase) => {
                let reason = match store.get_phase_status(phase.phase) {
                    PhaseStatus::InProgress => BlockReason::InProgress,
                    PhaseStatus::Failed if !retry_failed => BlockReason::Failed,
                    _ => BlockReason::WaitingOn(self.unmet_dependencies(phase, store)),
                };
                Eligibility::Blocked {
                    phase: phase.phase,
                    reason,
                }
            }
        }
    }

    /// Depth-first search for a dependency cycle; returns it as a closed path.
    fn find_cycle(&self) -> Option<Vec<u32>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit(
            plan: &PhasePlan,
            node: usize,
            marks: &mut [Mark],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<u32>> {
            marks[node] = Mark::OnStack;
            stack.push(node);
            for dep in &plan.phases[node].dependencies {
                let next = plan.index[dep];
                match marks[next] {
                    Mark::OnStack => {
                        let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<u32> =
                            stack[start..].iter().map(|&n| plan.phases[n].phase).collect();
                        cycle.push(plan.phases[next].phase);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(plan, next, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; self.phases.len()];
        let mut stack = Vec::new();
        for node in 0..self.phases.len() {
            if marks[node] == Mark::Unvisited
                && let Some(cycle) = visit(self, node, &mut marks, &mut stack)
            {
                return Some(cycle);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use tempfile::tempdir;

    fn linear_plan(n: u32) -> PhasePlan {
        PhasePlan::new(
            (0..n)
                .map(|i| PhaseConfig::new(i, &format!("Phase {}", i)))
                .collect(),
        )
        .unwrap()
    }

    fn make_store() -> (StateStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state.json"), system_clock()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_plan_sorts_phases() {
        let plan = PhasePlan::new(vec![
            PhaseConfig::new(2, "c"),
            PhaseConfig::new(0, "a"),
            PhaseConfig::new(1, "b"),
        ])
        .unwrap();
        let order: Vec<u32> = plan.order().map(|p| p.phase).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(plan.get(1).unwrap().name, "b");
        assert!(plan.get(9).is_none());
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let err = PhasePlan::new(vec![PhaseConfig::new(0, "a"), PhaseConfig::new(0, "b")])
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicatePhase(0)));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = PhasePlan::new(vec![PhaseConfig::new(3, "x")]).unwrap_err();
        assert!(matches!(
            err,
            PlanError::UnknownDependency {
                phase: 3,
                dependency: 2
            }
        ));
    }

    #[test]
    fn test_cycle_rejected_with_path() {
        let err = PhasePlan::new(vec![
            PhaseConfig::new(0, "a").with_dependencies(vec![2]),
            PhaseConfig::new(1, "b").with_dependencies(vec![0]),
            PhaseConfig::new(2, "c").with_dependencies(vec![1]),
        ])
        .unwrap_err();
        match err {
            PlanError::DependencyCycle(cycle) => {
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 4);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = PhasePlan::new(vec![PhaseConfig::new(0, "a").with_dependencies(vec![0])])
            .unwrap_err();
        assert!(matches!(err, PlanError::DependencyCycle(ref c) if c == &vec![0, 0]));
    }

    #[test]
    fn test_empty_plan_is_complete() {
        let plan = PhasePlan::new(Vec::new()).unwrap();
        let (store, _dir) = make_store();
        assert_eq!(plan.next_eligible_phase(&store, false), Eligibility::Complete);
    }

    #[test]
    fn test_linear_progression() {
        let plan = linear_plan(3);
        let (mut store, _dir) = make_store();
        assert_eq!(plan.next_eligible_phase(&store, false), Eligibility::Ready(0));

        store.set_phase_status(0, PhaseStatus::Completed).unwrap();
        assert_eq!(plan.next_eligible_phase(&store, false), Eligibility::Ready(1));

        store.set_phase_status(1, PhaseStatus::Completed).unwrap();
        store.set_phase_status(2, PhaseStatus::Completed).unwrap();
        assert_eq!(plan.next_eligible_phase(&store, false), Eligibility::Complete);
    }

    #[test]
    fn test_failed_phase_blocks_unless_retry() {
        let plan = linear_plan(3);
        let (mut store, _dir) = make_store();
        store.set_phase_status(0, PhaseStatus::Completed).unwrap();
        store.set_phase_status(1, PhaseStatus::Failed).unwrap();

        assert_eq!(
            plan.next_eligible_phase(&store, false),
            Eligibility::Blocked {
                phase: 1,
                reason: BlockReason::Failed
            }
        );
        assert_eq!(plan.next_eligible_phase(&store, true), Eligibility::Ready(1));
    }

    #[test]
    fn test_in_progress_phase_blocks() {
        let plan = linear_plan(2);
        let (mut store, _dir) = make_store();
        store.set_phase_status(0, PhaseStatus::InProgress).unwrap();
        let verdict = plan.next_eligible_phase(&store, true);
        assert_eq!(
            verdict,
            Eligibility::Blocked {
                phase: 0,
                reason: BlockReason::InProgress
            }
        );
        assert_eq!(verdict.to_string(), "blocked on phase 0 (in progress)");
    }

    #[test]
    fn test_independent_branch_runs_past_failure() {
        let plan = PhasePlan::new(vec![
            PhaseConfig::new(0, "root"),
            PhaseConfig::new(1, "left"),
            PhaseConfig::new(2, "right").with_dependencies(vec![0]),
        ])
        .unwrap();
        let (mut store, _dir) = make_store();
        store.set_phase_status(0, PhaseStatus::Completed).unwrap();
        store.set_phase_status(1, PhaseStatus::Failed).unwrap();
        assert_eq!(plan.next_eligible_phase(&store, false), Eligibility::Ready(2));
    }

    #[test]
    fn test_never_returns_phase_with_incomplete_dependencies() {
        let plan = PhasePlan::new(vec![
            PhaseConfig::new(0, "a"),
            PhaseConfig::new(1, "b").with_dependencies(vec![0]),
            PhaseConfig::new(2, "c").with_dependencies(vec![0, 1]),
        ])
        .unwrap();
        let statuses = [
            PhaseStatus::Pending,
            PhaseStatus::InProgress,
            PhaseStatus::Completed,
            PhaseStatus::Failed,
        ];

        for a in statuses {
            for b in statuses {
                for c in statuses {
                    let (mut store, _dir) = make_store();
                    store.set_phase_status(0, a).unwrap();
                    store.set_phase_status(1, b).unwrap();
                    store.set_phase_status(2, c).unwrap();
                    for retry in [false, true] {
                        if let Eligibility::Ready(p) = plan.next_eligible_phase(&store, retry) {
                            let config = plan.get(p).unwrap();
                            assert!(
                                plan.unmet_dependencies(config, &store).is_empty(),
                                "phase {p} returned with unmet dependencies ({a}, {b}, {c})"
                            );
                        }
                    }
                }
            }
        }
    }
}
