//! Damped Newton solver for square (or over/under-determined) nonlinear systems.
//!
//! The equilibrium core only talks to the `NonlinearSolver` trait: it hands over a
//! `ResidualSystem` (residuals + analytic Jacobian in solver space) and a starting point and gets
//! back the solution together with `SolveInfo`. Failure to converge is not an error, it is
//! reported through `SolveInfo::success`.
use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// residual function and its Jacobian in the solver's native variables
pub trait ResidualSystem {
    fn residuals(&self, y: &DVector<f64>) -> DVector<f64>;
    fn jacobian(&self, y: &DVector<f64>) -> DMatrix<f64>;
    /// largest allowed step (max-norm), None for unlimited
    fn max_step(&self) -> Option<f64> {
        None
    }
}

/// diagnostics of one (or several chained) nonlinear solves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveInfo {
    pub success: bool,
    /// residual evaluations
    pub nfev: usize,
    /// Jacobian evaluations
    pub njev: usize,
    /// Newton iterations
    pub nit: usize,
    /// max-norm of the final residual vector
    pub residual_norm: f64,
    /// seconds spent evaluating residuals, Jacobians and linear solves
    pub time_cpu: f64,
    /// seconds from entering to leaving the solver
    pub time_wall: f64,
    pub message: String,
}

impl SolveInfo {
    /// adds the counters of a later stage; success, residual and message are taken from it
    pub fn chain(&mut self, later: &SolveInfo) {
        self.nfev += later.nfev;
        self.njev += later.njev;
        self.nit += later.nit;
        self.time_cpu += later.time_cpu;
        self.time_wall += later.time_wall;
        self.success = later.success;
        self.residual_norm = later.residual_norm;
        self.message = later.message.clone();
    }
}

pub trait NonlinearSolver {
    fn solve(&self, system: &dyn ResidualSystem, y0: DVector<f64>) -> (DVector<f64>, SolveInfo);
}

/// settings of the damped Newton iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub max_iterations: usize,
    /// convergence when the max-norm of the residuals drops below this
    pub ftol: f64,
    /// backtracking factor of the line search
    pub line_search_beta: f64,
    pub max_line_search_iters: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-12,
            line_search_beta: 0.5,
            max_line_search_iters: 40,
        }
    }
}

/// Newton iteration with backtracking line search on the residual 2-norm.
/// Singular or non-square Jacobians fall back to an SVD least squares step.
#[derive(Debug, Clone, Default)]
pub struct DampedNewton {
    pub config: NewtonConfig,
}

impl DampedNewton {
    pub fn new(config: NewtonConfig) -> Self {
        Self { config }
    }
}

fn inf_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc: f64, x| acc.max(x.abs()))
}

fn all_finite(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// solves J dy = rhs, LU for square systems, SVD least squares otherwise
fn newton_step(jac: DMatrix<f64>, rhs: &DVector<f64>) -> Option<DVector<f64>> {
    if jac.is_square() {
        if let Some(dy) = jac.clone().lu().solve(rhs) {
            if all_finite(&dy) {
                return Some(dy);
            }
        }
    }
    let svd = jac.svd(true, true);
    let threshold = 1e-14 * svd.singular_values.max();
    svd.solve(rhs, threshold).ok().filter(all_finite)
}

impl NonlinearSolver for DampedNewton {
    fn solve(&self, system: &dyn ResidualSystem, y0: DVector<f64>) -> (DVector<f64>, SolveInfo) {
        let cfg = &self.config;
        let wall = Instant::now();
        let mut cpu = Duration::ZERO;
        let mut info = SolveInfo::default();

        let mut y = y0;
        let t = Instant::now();
        let mut f = system.residuals(&y);
        cpu += t.elapsed();
        info.nfev += 1;

        let finish = |mut info: SolveInfo, y: DVector<f64>, f: &DVector<f64>, cpu: Duration, success: bool, message: String| {
            info.success = success;
            info.residual_norm = inf_norm(f);
            info.time_cpu = cpu.as_secs_f64();
            info.time_wall = wall.elapsed().as_secs_f64();
            info.message = message;
            (y, info)
        };

        if !all_finite(&f) {
            return finish(info, y, &f, cpu, false, "non-finite residuals at the starting point".to_string());
        }

        for it in 0..cfg.max_iterations {
            info.nit = it;
            let norm = inf_norm(&f);
            if norm <= cfg.ftol {
                return finish(info, y, &f, cpu, true, format!("converged after {} iterations", it));
            }

            let t = Instant::now();
            let jac = system.jacobian(&y);
            info.njev += 1;
            let step = newton_step(jac, &(-&f));
            cpu += t.elapsed();
            let Some(mut dy) = step else {
                return finish(info, y, &f, cpu, false, format!("singular Jacobian at iteration {}", it));
            };
            if let Some(max_step) = system.max_step() {
                let longest = inf_norm(&dy);
                if longest > max_step {
                    dy *= max_step / longest;
                }
            }

            let norm2 = f.norm();
            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..cfg.max_line_search_iters {
                let y_new = &y + alpha * &dy;
                let t = Instant::now();
                let f_new = system.residuals(&y_new);
                cpu += t.elapsed();
                info.nfev += 1;
                if all_finite(&f_new) && f_new.norm() <= norm2 {
                    accepted = Some((y_new, f_new));
                    break;
                }
                alpha *= cfg.line_search_beta;
            }
            let Some((y_new, f_new)) = accepted else {
                return finish(info, y, &f, cpu, false, format!("line search failed at iteration {}", it));
            };
            debug!("newton iteration {}: |f| = {:e}, alpha = {}", it, inf_norm(&f_new), alpha);
            y = y_new;
            f = f_new;
        }
        info.nit = cfg.max_iterations;
        if inf_norm(&f) <= cfg.ftol {
            return finish(info, y, &f, cpu, true, "converged on the last iteration".to_string());
        }
        let message = format!("maximum number of iterations ({}) reached", cfg.max_iterations);
        finish(info, y, &f, cpu, false, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Circle;
    // x^2 + y^2 = 4, x = y
    impl ResidualSystem for Circle {
        fn residuals(&self, y: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![y[0] * y[0] + y[1] * y[1] - 4.0, y[0] - y[1]])
        }
        fn jacobian(&self, y: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_row_slice(2, 2, &[2.0 * y[0], 2.0 * y[1], 1.0, -1.0])
        }
    }

    struct Exponential {
        limit: Option<f64>,
    }
    // exp(y) = 1e-3
    impl ResidualSystem for Exponential {
        fn residuals(&self, y: &DVector<f64>) -> DVector<f64> {
            DVector::from_vec(vec![y[0].exp() / 1e-3 - 1.0])
        }
        fn jacobian(&self, y: &DVector<f64>) -> DMatrix<f64> {
            DMatrix::from_element(1, 1, y[0].exp() / 1e-3)
        }
        fn max_step(&self) -> Option<f64> {
            self.limit
        }
    }

    #[test]
    fn test_newton_circle() {
        let solver = DampedNewton::default();
        let (y, info) = solver.solve(&Circle, DVector::from_vec(vec![1.0, 3.0]));
        assert!(info.success, "{}", info.message);
        assert_relative_eq!(y[0], 2.0_f64.sqrt(), epsilon = 1e-10);
        assert_relative_eq!(y[1], 2.0_f64.sqrt(), epsilon = 1e-10);
        assert!(info.nfev >= info.njev);
        assert!(info.time_wall >= info.time_cpu);
    }

    #[test]
    fn test_newton_step_limit() {
        let solver = DampedNewton::default();
        let (y, info) = solver.solve(&Exponential { limit: Some(1.0) }, DVector::from_vec(vec![0.0]));
        assert!(info.success, "{}", info.message);
        assert_relative_eq!(y[0], (1e-3_f64).ln(), epsilon = 1e-10);
        // at least ln(1e3) / 1 limited steps
        assert!(info.nit >= 6);
    }

    #[test]
    fn test_newton_reports_failure() {
        let config = NewtonConfig {
            max_iterations: 2,
            ..NewtonConfig::default()
        };
        let solver = DampedNewton::new(config);
        let (_, info) = solver.solve(&Exponential { limit: Some(0.1) }, DVector::from_vec(vec![0.0]));
        assert!(!info.success);
        assert!(info.message.contains("maximum number of iterations"));
    }

    #[test]
    fn test_solve_info_chain() {
        let mut first = SolveInfo {
            success: false,
            nfev: 3,
            njev: 2,
            ..SolveInfo::default()
        };
        let second = SolveInfo {
            success: true,
            nfev: 4,
            njev: 1,
            message: "ok".to_string(),
            ..SolveInfo::default()
        };
        first.chain(&second);
        assert!(first.success);
        assert_eq!(first.nfev, 7);
        assert_eq!(first.njev, 3);
        assert_eq!(first.message, "ok");
    }
}
