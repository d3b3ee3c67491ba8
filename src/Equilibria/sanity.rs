use crate::Equilibria::substances::EqSystem;
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SanityViolation {
    NegativeConcentration,
    ExceedsConservationBound,
}

/// outcome of the post-hoc validation of a solution; advisory only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SanityReport {
    pub violations: Vec<SanityViolation>,
    /// indices of negative concentrations
    pub negative: Vec<usize>,
    /// indices of concentrations above their conservation bound
    pub too_much: Vec<usize>,
}

impl SanityReport {
    pub fn is_sane(&self) -> bool {
        self.violations.is_empty()
    }
}

/// flags negative concentrations and concentrations exceeding their conservation bound by more
/// than `rtol` (relative). Both checks run independently.
pub fn result_is_sane(eqsys: &EqSystem, init_concs: &[f64], x: &[f64], rtol: f64) -> SanityReport {
    let upper = eqsys.upper_conc_bounds(init_concs);
    let negative: Vec<usize> = x
        .iter()
        .enumerate()
        .filter(|(_, xi)| **xi < 0.0 || xi.is_nan())
        .map(|(i, _)| i)
        .collect();
    let too_much: Vec<usize> = x
        .iter()
        .zip(upper.iter())
        .enumerate()
        .filter(|(_, (xi, bound))| **xi > **bound * (1.0 + rtol))
        .map(|(i, _)| i)
        .collect();

    let mut violations = Vec::new();
    if !negative.is_empty() {
        warn!("Negative concentration of {:?}", names(eqsys, &negative));
        violations.push(SanityViolation::NegativeConcentration);
    }
    if !too_much.is_empty() {
        warn!(
            "Too much of at least one component: {:?}",
            names(eqsys, &too_much)
        );
        violations.push(SanityViolation::ExceedsConservationBound);
    }
    SanityReport {
        violations,
        negative,
        too_much,
    }
}

fn names(eqsys: &EqSystem, idxs: &[usize]) -> Vec<String> {
    idxs.iter()
        .filter_map(|i| eqsys.substances.get(*i).map(|s| s.name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Equilibria::substances::{Reaction, Substance};

    fn dimerization() -> EqSystem {
        // 2 A <-> A2
        let substances = vec![
            Substance::new("A", &[(1, 1.0)]),
            Substance::new("A2", &[(1, 2.0)]),
        ];
        let rxns = vec![Reaction::new(&[("A", -2.0), ("A2", 1.0)], 10.0)];
        EqSystem::new(substances, rxns).unwrap()
    }

    #[test]
    fn test_sane_result() {
        let eqsys = dimerization();
        let report = result_is_sane(&eqsys, &[1.0, 0.0], &[0.5, 0.25], 1e-12);
        assert!(report.is_sane());
    }

    #[test]
    fn test_negative_concentration() {
        let eqsys = dimerization();
        let report = result_is_sane(&eqsys, &[1.0, 0.0], &[-1e-9, 0.25], 1e-12);
        assert!(!report.is_sane());
        assert_eq!(report.violations, vec![SanityViolation::NegativeConcentration]);
        assert_eq!(report.negative, vec![0]);
    }

    #[test]
    fn test_both_violations_fire() {
        let eqsys = dimerization();
        // bound of A2 is 0.5
        let report = result_is_sane(&eqsys, &[1.0, 0.0], &[-0.1, 0.6], 1e-12);
        assert_eq!(
            report.violations,
            vec![
                SanityViolation::NegativeConcentration,
                SanityViolation::ExceedsConservationBound
            ]
        );
        assert_eq!(report.too_much, vec![1]);
    }

    #[test]
    fn test_bound_tolerance() {
        let eqsys = dimerization();
        let report = result_is_sane(&eqsys, &[1.0, 0.0], &[1.0 + 1e-14, 0.0], 1e-12);
        assert!(report.is_sane());
        let report = result_is_sane(&eqsys, &[1.0, 0.0], &[1.0 + 1e-9, 0.0], 1e-12);
        assert!(!report.is_sane());
    }
}
