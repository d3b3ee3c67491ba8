use crate::Equilibria::substances::EqSystem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// which solid phases are considered present, one flag per phase transfer reaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseState(pub Vec<bool>);

impl PhaseState {
    pub fn all_absent(n: usize) -> Self {
        PhaseState(vec![false; n])
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn n_present(&self) -> usize {
        self.0.iter().filter(|p| **p).count()
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: String = self.0.iter().map(|p| if *p { '1' } else { '0' }).collect();
        write!(f, "[{}]", flags)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseTransition {
    /// the solid was absent and the solution is supersaturated
    Appear,
    /// the solid was present but its amount dropped below the floor
    Dissolve,
    Unchanged,
}

/// forward/backward predicates of one phase transfer reaction. The forward predicate is only
/// asked while the solid is absent and the backward one only while it is present, which gives
/// the hysteresis band that stops toggling at the phase boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseCondition {
    pub reaction: usize,
    pub rtol: f64,
    pub small: f64,
    /// equilibrium constant replacing the reaction's own
    pub k: Option<f64>,
}

impl PhaseCondition {
    pub fn new(reaction: usize, rtol: f64, small: f64) -> Self {
        Self {
            reaction,
            rtol,
            small,
            k: None,
        }
    }

    pub fn with_k(mut self, k: f64) -> Self {
        self.k = Some(k);
        self
    }

    /// conditions for every phase transfer reaction of the system, in reaction order
    pub fn for_system(eqsys: &EqSystem, rtol: f64, small: f64) -> Vec<Self> {
        eqsys
            .phase_transfer_reaction_idxs()
            .into_iter()
            .map(|ri| Self::new(ri, rtol, small))
            .collect()
    }

    /// supersaturation of the fully dissolved concentrations: the solid should appear
    pub fn forward(&self, eqsys: &EqSystem, x: &[f64]) -> bool {
        let Some(precipitate) = eqsys.precipitate_stoich(self.reaction) else {
            return false;
        };
        let q = eqsys.reaction_quotient(self.reaction, eqsys.dissolved(x).as_slice());
        let k = self.k.unwrap_or(eqsys.rxns[self.reaction].k);
        if precipitate.coeff > 0.0 {
            q * (1.0 + self.rtol) < k
        } else {
            q > k * (1.0 + self.rtol)
        }
    }

    /// the solid is still there
    pub fn backward(&self, eqsys: &EqSystem, x: &[f64]) -> bool {
        match eqsys.precipitate_stoich(self.reaction) {
            Some(precipitate) => x[precipitate.idx] >= self.small,
            None => false,
        }
    }

    pub fn transition(&self, eqsys: &EqSystem, x: &[f64], present: bool) -> PhaseTransition {
        if present {
            if self.backward(eqsys, x) {
                PhaseTransition::Unchanged
            } else {
                PhaseTransition::Dissolve
            }
        } else if self.forward(eqsys, x) {
            PhaseTransition::Appear
        } else {
            PhaseTransition::Unchanged
        }
    }
}

/// next phase state given the current one and concentrations `x`
pub fn next_phase_state(
    eqsys: &EqSystem,
    conditions: &[PhaseCondition],
    current: &PhaseState,
    x: &[f64],
) -> PhaseState {
    PhaseState(
        conditions
            .iter()
            .zip(current.0.iter())
            .map(|(cond, present)| match cond.transition(eqsys, x, *present) {
                PhaseTransition::Appear => true,
                PhaseTransition::Dissolve => false,
                PhaseTransition::Unchanged => *present,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Equilibria::substances::{Reaction, Substance};

    /// C <-> D(s) with K = 1/[C]sat, [C]sat = 1e-4
    fn saturating_system() -> EqSystem {
        let substances = vec![
            Substance::new("C", &[(1, 1.0)]),
            Substance::new("D", &[(1, 1.0)]).with_phase(1),
        ];
        let rxns = vec![Reaction::new(&[("C", -1.0), ("D", 1.0)], 1e4)];
        EqSystem::new(substances, rxns).unwrap()
    }

    #[test]
    fn test_forward_condition() {
        let eqsys = saturating_system();
        let cond = PhaseCondition::new(0, 1e-14, 0.0);
        // undersaturated
        assert!(!cond.forward(&eqsys, &[1e-5, 0.0]));
        // supersaturated
        assert!(cond.forward(&eqsys, &[1e-3, 0.0]));
        // the solid is put back into solution before comparing
        assert!(cond.forward(&eqsys, &[1e-5, 1e-3]));
        // a larger constant lowers the solubility
        assert!(cond.with_k(1e6).forward(&eqsys, &[1e-5, 0.0]));
    }

    #[test]
    fn test_forward_condition_reversed_reaction() {
        // D(s) <-> C with K = [C]sat
        let substances = vec![
            Substance::new("C", &[(1, 1.0)]),
            Substance::new("D", &[(1, 1.0)]).with_phase(1),
        ];
        let rxns = vec![Reaction::new(&[("D", -1.0), ("C", 1.0)], 1e-4)];
        let eqsys = EqSystem::new(substances, rxns).unwrap();
        let cond = PhaseCondition::new(0, 1e-14, 0.0);
        assert!(cond.forward(&eqsys, &[1e-3, 0.0]));
        assert!(!cond.forward(&eqsys, &[1e-5, 0.0]));
    }

    #[test]
    fn test_backward_condition() {
        let eqsys = saturating_system();
        let cond = PhaseCondition::new(0, 1e-14, 1e-35);
        assert!(cond.backward(&eqsys, &[1e-4, 1e-6]));
        assert!(!cond.backward(&eqsys, &[1e-4, 0.0]));
        assert!(!cond.backward(&eqsys, &[1e-4, -1e-9]));
    }

    #[test]
    fn test_transition_never_both_directions() {
        let eqsys = saturating_system();
        let cond = PhaseCondition::new(0, 1e-14, 1e-35);
        let states = [
            [1e-3, 0.0],
            [1e-3, 1e-3],
            [1e-5, 0.0],
            [1e-5, 1e-3],
            [1e-4, -1e-6],
        ];
        for x in states.iter() {
            for present in [false, true] {
                let t = cond.transition(&eqsys, x, present);
                if present {
                    assert_ne!(t, PhaseTransition::Appear);
                } else {
                    assert_ne!(t, PhaseTransition::Dissolve);
                }
            }
        }
    }

    #[test]
    fn test_next_phase_state() {
        let eqsys = saturating_system();
        let conds = PhaseCondition::for_system(&eqsys, 1e-14, 1e-35);
        let absent = PhaseState::all_absent(1);
        assert_eq!(
            next_phase_state(&eqsys, &conds, &absent, &[1e-3, 0.0]),
            PhaseState(vec![true])
        );
        let present = PhaseState(vec![true]);
        assert_eq!(
            next_phase_state(&eqsys, &conds, &present, &[1e-3, 0.0]),
            PhaseState(vec![false])
        );
        assert_eq!(format!("{}", present), "[1]");
    }
}
