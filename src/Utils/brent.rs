use crate::Equilibria::eq_errors::EquilibriumError;

/// derivative free scalar root finding on a bracket with a sign change
pub trait BracketingRootFinder {
    fn find_root(&self, f: &dyn Fn(f64) -> f64, lo: f64, hi: f64) -> Result<f64, EquilibriumError>;
}

/// Brent's method (inverse quadratic interpolation, secant and bisection).
/// Non-finite function values at the bracket ends are tolerated: interpolation is then rejected
/// and the step falls back to bisection.
#[derive(Debug, Clone)]
pub struct Brent {
    pub xtol: f64,
    pub rtol: f64,
    pub maxiter: usize,
}

impl Default for Brent {
    fn default() -> Self {
        Self {
            xtol: 2e-12,
            rtol: 4.0 * f64::EPSILON,
            maxiter: 100,
        }
    }
}

impl BracketingRootFinder for Brent {
    fn find_root(&self, f: &dyn Fn(f64) -> f64, lo: f64, hi: f64) -> Result<f64, EquilibriumError> {
        let (mut xpre, mut xcur) = (lo, hi);
        let (mut fpre, mut fcur) = (f(xpre), f(xcur));
        if fpre == 0.0 {
            return Ok(xpre);
        }
        if fcur == 0.0 {
            return Ok(xcur);
        }
        if fpre.signum() == fcur.signum() {
            return Err(EquilibriumError::NoSignChange { lo, hi });
        }
        let (mut xblk, mut fblk) = (0.0, 0.0);
        let (mut spre, mut scur) = (0.0, 0.0);

        for _ in 0..self.maxiter {
            if fpre != 0.0 && fcur != 0.0 && fpre.signum() != fcur.signum() {
                xblk = xpre;
                fblk = fpre;
                spre = xcur - xpre;
                scur = spre;
            }
            if fblk.abs() < fcur.abs() {
                xpre = xcur;
                xcur = xblk;
                xblk = xpre;
                fpre = fcur;
                fcur = fblk;
                fblk = fpre;
            }

            let delta = (self.xtol + self.rtol * xcur.abs()) / 2.0;
            let sbis = (xblk - xcur) / 2.0;
            if fcur == 0.0 || sbis.abs() < delta {
                return Ok(xcur);
            }

            if spre.abs() > delta && fcur.abs() < fpre.abs() {
                let stry = if xpre == xblk {
                    // secant
                    -fcur * (xcur - xpre) / (fcur - fpre)
                } else {
                    // inverse quadratic
                    let dpre = (fpre - fcur) / (xpre - xcur);
                    let dblk = (fblk - fcur) / (xblk - xcur);
                    -fcur * (fblk * dblk - fpre * dpre) / (dblk * dpre * (fblk - fpre))
                };
                // NaN fails the comparison and ends up bisecting
                if 2.0 * stry.abs() < spre.abs().min(3.0 * sbis.abs() - delta) {
                    spre = scur;
                    scur = stry;
                } else {
                    spre = sbis;
                    scur = sbis;
                }
            } else {
                spre = sbis;
                scur = sbis;
            }

            xpre = xcur;
            fpre = fcur;
            if scur.abs() > delta {
                xcur += scur;
            } else {
                xcur += if sbis > 0.0 { delta } else { -delta };
            }
            fcur = f(xcur);
        }
        Err(EquilibriumError::RootFinderMaxIter(self.maxiter))
    }
}
