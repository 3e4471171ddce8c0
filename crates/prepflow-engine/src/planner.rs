//! Phase planner
//!
//! Pure function of the step list: no side effects, no knowledge of the
//! rest of the engine.

use crate::types::Step;
use std::collections::HashSet;

/// Partition steps into dependency-respecting phases
///
/// Maintains a satisfied-set and repeatedly moves every step whose
/// dependencies are already satisfied into the current phase. When a scan
/// moves nothing (circular or unresolvable dependencies), the remaining
/// steps are bundled into one terminal phase and executed anyway: their
/// parameter resolution may suffer, but the run is guaranteed to make
/// progress instead of deadlocking.
#[must_use]
pub fn plan_phases(steps: &[Step]) -> Vec<Vec<Step>> {
    let mut phases: Vec<Vec<Step>> = Vec::new();
    let mut satisfied: HashSet<u32> = HashSet::new();
    let mut remaining: Vec<Step> = steps.to_vec();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<Step>, Vec<Step>) = remaining
            .into_iter()
            .partition(|step| step.dependencies.iter().all(|dep| satisfied.contains(dep)));

        if ready.is_empty() {
            tracing::warn!(
                blocked_steps = ?blocked.iter().map(|s| s.step_number).collect::<Vec<_>>(),
                "unresolvable dependencies; forcing remaining steps into a terminal phase"
            );
            phases.push(blocked);
            break;
        }

        satisfied.extend(ready.iter().map(|step| step.step_number));
        phases.push(ready);
        remaining = blocked;
    }

    phases
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(number: u32, deps: &[u32]) -> Step {
        let mut step = Step::new(number, "search_content", format!("step {number}"));
        step.dependencies = deps.to_vec();
        step
    }

    #[test]
    fn independent_steps_form_one_phase() {
        let phases = plan_phases(&[step(1, &[]), step(2, &[]), step(3, &[])]);

        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].len(), 3);
    }

    #[test]
    fn linear_chain_forms_singleton_phases() {
        let phases = plan_phases(&[step(1, &[]), step(2, &[1]), step(3, &[2]), step(4, &[3])]);

        assert_eq!(phases.len(), 4);
        for (i, phase) in phases.iter().enumerate() {
            assert_eq!(phase.len(), 1);
            assert_eq!(phase[0].step_number, (i + 1) as u32);
        }
    }

    #[test]
    fn diamond_dependencies() {
        let phases = plan_phases(&[step(1, &[]), step(2, &[1]), step(3, &[1]), step(4, &[2, 3])]);

        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0][0].step_number, 1);
        let middle: Vec<u32> = phases[1].iter().map(|s| s.step_number).collect();
        assert_eq!(middle, vec![2, 3]);
        assert_eq!(phases[2][0].step_number, 4);
    }

    #[test]
    fn circular_pair_terminates_in_one_forced_phase() {
        let phases = plan_phases(&[step(1, &[2]), step(2, &[1])]);

        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].len(), 2);
    }

    #[test]
    fn missing_dependency_is_forced_after_resolvable_steps() {
        let phases = plan_phases(&[step(1, &[]), step(2, &[99])]);

        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0][0].step_number, 1);
        assert_eq!(phases[1][0].step_number, 2);
    }

    #[test]
    fn empty_plan_yields_no_phases() {
        assert!(plan_phases(&[]).is_empty());
    }

    #[test]
    fn step_numbers_need_not_be_sequential() {
        let phases = plan_phases(&[step(10, &[]), step(7, &[10])]);

        assert_eq!(phases.len(), 2);
        assert_eq!(phases[0][0].step_number, 10);
        assert_eq!(phases[1][0].step_number, 7);
    }
}
