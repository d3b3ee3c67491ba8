//! Equilibrium of a single reaction along its reaction coordinate.
//!
//! c(rc) = c0 + rc·stoich, the reaction coordinate is bracketed by the depletion of the first
//! reactant (forward) and of the first product (backward) and found with a bracketing root finder.
use crate::Equilibria::eq_errors::EquilibriumError;
use crate::Equilibria::substances::equilibrium_quotient;
use crate::Utils::brent::BracketingRootFinder;

/// optional correction multiplying the reaction quotient, e.g. a product of activity coefficients
pub type ActivityProduct<'a> = &'a dyn Fn(&[f64]) -> f64;

/// K - Q(c0 + rc·stoich)
pub fn equilibrium_residual(
    rc: f64,
    c0: &[f64],
    stoich: &[f64],
    k: f64,
    activity_product: Option<ActivityProduct>,
) -> f64 {
    let c: Vec<f64> = c0.iter().zip(stoich.iter()).map(|(ci, si)| ci + rc * si).collect();
    let mut q = equilibrium_quotient(&c, stoich);
    if let Some(gamma) = activity_product {
        q *= gamma(&c);
    }
    k - q
}

/// feasible span (lower, upper) of the reaction coordinate. Only entries with nonzero
/// stoichiometry should be passed.
pub fn get_rc_interval(stoich: &[f64], c0: &[f64]) -> Result<(f64, f64), EquilibriumError> {
    let limits: Vec<f64> = c0.iter().zip(stoich.iter()).map(|(c, s)| c / s).collect();
    let upper = limits
        .iter()
        .filter(|l| **l < 0.0)
        .cloned()
        .reduce(f64::max)
        .map_or(0.0, |m| -m);
    let lower = limits
        .iter()
        .filter(|l| **l > 0.0)
        .cloned()
        .reduce(f64::min)
        .map_or(0.0, |m| -m);
    if lower == 0.0 && upper == 0.0 {
        return Err(EquilibriumError::IllPosedInterval);
    }
    Ok((lower, upper))
}

/// reaction coordinate at equilibrium; substances not taking part are ignored
pub fn solve_equilibrium_coord(
    c0: &[f64],
    stoich: &[f64],
    k: f64,
    activity_product: Option<ActivityProduct>,
    finder: &dyn BracketingRootFinder,
) -> Result<f64, EquilibriumError> {
    if c0.len() != stoich.len() {
        return Err(EquilibriumError::DimensionMismatch {
            what: "stoichiometry".to_string(),
            expected: c0.len(),
            got: stoich.len(),
        });
    }
    let (c0_m, stoich_m): (Vec<f64>, Vec<f64>) = c0
        .iter()
        .zip(stoich.iter())
        .filter(|(_, s)| **s != 0.0)
        .map(|(c, s)| (*c, *s))
        .unzip();
    let (lower, upper) = get_rc_interval(&stoich_m, &c0_m)?;
    // the activity correction sees the masked concentrations only
    let residual = |rc: f64| equilibrium_residual(rc, &c0_m, &stoich_m, k, activity_product);
    finder.find_root(&residual, lower, upper)
}

/// equilibrium concentrations c0 + rc·stoich of a single reaction
pub fn solve_equilibrium(
    c0: &[f64],
    stoich: &[f64],
    k: f64,
    activity_product: Option<ActivityProduct>,
    finder: &dyn BracketingRootFinder,
) -> Result<Vec<f64>, EquilibriumError> {
    let rc = solve_equilibrium_coord(c0, stoich, k, activity_product, finder)?;
    Ok(c0.iter().zip(stoich.iter()).map(|(c, s)| c + rc * s).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Utils::brent::Brent;
    use approx::assert_relative_eq;

    #[test]
    fn test_isomerization() {
        // A <-> B, K = 2
        let c = solve_equilibrium(&[1.0, 0.0], &[-1.0, 1.0], 2.0, None, &Brent::default()).unwrap();
        assert_relative_eq!(c[0], 1.0 / 3.0, epsilon = 1e-10);
        assert_relative_eq!(c[1], 2.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_rc_interval() {
        let (lower, upper) = get_rc_interval(&[-1.0, 1.0], &[1.0, 0.0]).unwrap();
        assert_eq!((lower, upper), (0.0, 1.0));
        let (lower, upper) = get_rc_interval(&[-1.0, 1.0], &[1.0, 0.5]).unwrap();
        assert_eq!((lower, upper), (-0.5, 1.0));
    }

    #[test]
    fn test_ill_posed_interval() {
        let res = get_rc_interval(&[-1.0, 1.0], &[0.0, 0.0]);
        assert!(matches!(res, Err(EquilibriumError::IllPosedInterval)));
        let res = solve_equilibrium(&[0.0, 0.0, 1.0], &[-1.0, 1.0, 0.0], 2.0, None, &Brent::default());
        assert!(matches!(res, Err(EquilibriumError::IllPosedInterval)));
    }

    #[test]
    fn test_dissociation_satisfies_mass_action() {
        // AB <-> A + B, K = 1e-3, spectator C
        let c0 = [0.1, 0.0, 0.0, 7.0];
        let stoich = [-1.0, 1.0, 1.0, 0.0];
        let k = 1e-3;
        let c = solve_equilibrium(&c0, &stoich, k, None, &Brent::default()).unwrap();
        assert_relative_eq!(c[1] * c[2] / c[0], k, max_relative = 1e-8);
        assert_eq!(c[3], 7.0);
        assert_relative_eq!(c[0] + c[1], 0.1, epsilon = 1e-14);
    }

    #[test]
    fn test_activity_product() {
        // halving the activity doubles the quotient needed from the concentrations
        let gamma = |_c: &[f64]| 0.5;
        let c = solve_equilibrium(&[1.0, 0.0], &[-1.0, 1.0], 1.0, Some(&gamma), &Brent::default()).unwrap();
        assert_relative_eq!(c[1] / c[0], 2.0, max_relative = 1e-8);
        assert_relative_eq!(equilibrium_residual(0.0, &[1.0, 0.0], &[-1.0, 1.0], 1.0, Some(&gamma)), 1.0);
    }
}
