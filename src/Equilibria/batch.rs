//! Equilibria over grids of initial concentrations.
//!
//! `EqCalcResult` solves every point of the outer product of the varied initial concentrations
//! (row-major, last varied substance fastest), sequentially or on the rayon thread pool.
//! `EqSystem::roots` solves a one dimensional series, optionally seeding each point with the
//! solution of the previous one.
use crate::Equilibria::eq_errors::EquilibriumError;
use crate::Equilibria::neqsys::{ConditionalChainedSolver, EquilibriumResult};
use crate::Equilibria::phase_conditions::PhaseState;
use crate::Equilibria::substances::{EqSystem, ravel_index, unravel_index};
use crate::settings::EquilibriumSettings;
use crate::Utils::nonlinear_solver::SolveInfo;
use log::{info, warn};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct EqCalcResult<'a> {
    pub eqsys: &'a EqSystem,
    pub init_concs: Vec<f64>,
    /// (substance name, values) in grid axis order
    pub varied: Vec<(String, Vec<f64>)>,
    pub shape: Vec<usize>,
    pub varied_idxs: Vec<usize>,
    /// initial concentrations of every grid point, row-major
    pub all_inits: Vec<Vec<f64>>,
    pub results: Vec<EquilibriumResult>,
    /// structural error of a grid point, None where the solve ran
    pub errors: Vec<Option<String>>,
}

impl<'a> EqCalcResult<'a> {
    pub fn new(
        eqsys: &'a EqSystem,
        init_concs: &[f64],
        varied: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, EquilibriumError> {
        let (shape, all_inits, varied_idxs) = eqsys.per_substance_varied(init_concs, &varied)?;
        Ok(Self {
            eqsys,
            init_concs: init_concs.to_vec(),
            varied,
            shape,
            varied_idxs,
            all_inits,
            results: Vec::new(),
            errors: Vec::new(),
        })
    }

    pub fn n_points(&self) -> usize {
        self.all_inits.len()
    }

    fn failed_cell(&self, err: &EquilibriumError) -> (EquilibriumResult, Option<String>) {
        let failed = EquilibriumResult {
            conc: vec![0.0; self.eqsys.ns],
            precipitates: PhaseState::all_absent(self.eqsys.phase_transfer_reaction_idxs().len()),
            ..EquilibriumResult::default()
        };
        (failed, Some(err.to_string()))
    }

    fn solve_cell(
        &self,
        flat: usize,
        settings: &EquilibriumSettings,
        x0: Option<&[f64]>,
    ) -> (EquilibriumResult, Option<String>) {
        let solver = ConditionalChainedSolver::with_newton(self.eqsys, settings);
        match solver.solve(&self.all_inits[flat], x0, None) {
            Ok(result) => {
                if !result.sane {
                    warn!("grid point {:?} gave an insane result", unravel_index(flat, &self.shape));
                }
                (result, None)
            }
            Err(err) => {
                warn!("grid point {:?} failed: {}", unravel_index(flat, &self.shape), err);
                self.failed_cell(&err)
            }
        }
    }

    fn store(&mut self, cells: Vec<(EquilibriumResult, Option<String>)>) {
        let (results, errors) = cells.into_iter().unzip();
        self.results = results;
        self.errors = errors;
        let n_sane = self.results.iter().filter(|r| r.sane).count();
        info!("grid solved: {} of {} points sane", n_sane, self.n_points());
    }

    pub fn solve(&mut self, settings: &EquilibriumSettings, x0: Option<&[f64]>) {
        info!("solving a grid of {:?} points sequentially", self.shape);
        let cells: Vec<_> = (0..self.n_points())
            .map(|flat| self.solve_cell(flat, settings, x0))
            .collect();
        self.store(cells);
    }

    /// every grid point on the rayon pool; points share only read-only data
    pub fn solve_parallel(&mut self, settings: &EquilibriumSettings, x0: Option<&[f64]>) {
        info!("solving a grid of {:?} points in parallel", self.shape);
        let cells: Vec<_> = (0..self.n_points())
            .into_par_iter()
            .map(|flat| self.solve_cell(flat, settings, x0))
            .collect();
        self.store(cells);
    }

    pub fn result_at(&self, index: &[usize]) -> Option<&EquilibriumResult> {
        if index.len() != self.shape.len() || index.iter().zip(self.shape.iter()).any(|(i, n)| i >= n) {
            return None;
        }
        self.results.get(ravel_index(index, &self.shape))
    }

    pub fn conc_at(&self, index: &[usize]) -> Option<&[f64]> {
        self.result_at(index).map(|r| r.conc.as_slice())
    }

    pub fn sane_at(&self, index: &[usize]) -> Option<bool> {
        self.result_at(index).map(|r| r.sane)
    }

    /// concentration of one substance at every grid point, row-major
    pub fn conc_of(&self, substance: &str) -> Result<Vec<f64>, EquilibriumError> {
        let si = self.eqsys.as_substance_index(substance)?;
        Ok(self.results.iter().map(|r| r.conc[si]).collect())
    }

    pub fn info_at(&self, index: &[usize]) -> Option<&SolveInfo> {
        self.result_at(index).map(|r| &r.info)
    }

    fn per_point<T>(&self, f: impl Fn(&EquilibriumResult) -> T) -> Vec<T> {
        self.results.iter().map(f).collect()
    }

    /// equilibrium concentrations of every grid point, row-major
    pub fn conc(&self) -> Vec<Vec<f64>> {
        self.per_point(|r| r.conc.clone())
    }

    pub fn sane(&self) -> Vec<bool> {
        self.per_point(|r| r.sane)
    }

    pub fn success(&self) -> Vec<bool> {
        self.per_point(|r| r.info.success)
    }

    pub fn nfev(&self) -> Vec<usize> {
        self.per_point(|r| r.info.nfev)
    }

    pub fn njev(&self) -> Vec<usize> {
        self.per_point(|r| r.info.njev)
    }

    pub fn time_cpu(&self) -> Vec<f64> {
        self.per_point(|r| r.info.time_cpu)
    }

    pub fn time_wall(&self) -> Vec<f64> {
        self.per_point(|r| r.info.time_wall)
    }
}

impl EqSystem {
    /// equilibria for a series of initial concentrations of one substance. With `propagate` the
    /// solution of each point is the starting guess of the next one.
    pub fn roots(
        &self,
        init_concs: &[f64],
        varied_data: &[f64],
        varied: &str,
        x0: Option<&[f64]>,
        settings: &EquilibriumSettings,
        propagate: bool,
    ) -> Result<Vec<EquilibriumResult>, EquilibriumError> {
        let (_, all_inits, _) =
            self.per_substance_varied(init_concs, &[(varied.to_string(), varied_data.to_vec())])?;
        let solver = ConditionalChainedSolver::with_newton(self, settings);
        let mut results: Vec<EquilibriumResult> = Vec::with_capacity(all_inits.len());
        for init in &all_inits {
            let seed = match results.last() {
                Some(prev) if propagate && prev.info.success => Some(prev.conc.as_slice()),
                _ => x0,
            };
            let result = solver.solve(init, seed, None)?;
            if !result.info.success {
                warn!("series point {} = {:e} did not converge", varied, init[self.as_substance_index(varied)?]);
            }
            results.push(result);
        }
        info!("series over {} solved at {} points", varied, results.len());
        Ok(results)
    }
}
