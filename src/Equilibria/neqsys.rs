//! Orchestration of equilibrium solves.
//!
//! A solve runs a chain of formulations (by default Log then Lin), every stage seeded with the
//! result of the previous one, and decides which solids are present with the phase conditions.
//! How the two are interleaved is chosen by `NeqSysType`.
use crate::Equilibria::eq_errors::EquilibriumError;
use crate::Equilibria::num_sys::{EquationSet, NumSys, NumSysEnum, NumSysKind, create_numsys};
use crate::Equilibria::phase_conditions::{PhaseCondition, PhaseState, next_phase_state};
use crate::Equilibria::sanity::{SanityReport, result_is_sane};
use crate::Equilibria::substances::EqSystem;
use crate::Utils::nonlinear_solver::{DampedNewton, NonlinearSolver, ResidualSystem, SolveInfo};
use crate::settings::{EquilibriumSettings, NeqSysType};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use prettytable::{Table, row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// concentrations, solver diagnostics and validation of one equilibrium solve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumResult {
    pub conc: Vec<f64>,
    pub info: SolveInfo,
    pub sanity: SanityReport,
    pub sane: bool,
    /// final phase state, one flag per phase transfer reaction
    pub precipitates: PhaseState,
}

impl EquilibriumResult {
    /// one row per substance with its initial and equilibrium concentration
    pub fn to_table(&self, eqsys: &EqSystem, init_concs: &[f64]) -> Table {
        let mut table = Table::new();
        table.add_row(row!["Substance", "Phase", "Initial", "Equilibrium"]);
        for (i, s) in eqsys.substances.iter().enumerate() {
            let phase = if s.is_dissolved() {
                "dissolved".to_string()
            } else {
                format!("solid {}", s.phase_idx)
            };
            let init = init_concs.get(i).copied().unwrap_or(f64::NAN);
            let conc = self.conc.get(i).copied().unwrap_or(f64::NAN);
            table.add_row(row![s.name, phase, format!("{:.4e}", init), format!("{:.4e}", conc)]);
        }
        table
    }

    pub fn pretty_print(&self, eqsys: &EqSystem, init_concs: &[f64]) {
        self.to_table(eqsys, init_concs).printstd();
        println!(
            "success: {}, sane: {}, precipitates: {}, nfev: {}, {}",
            self.info.success, self.sane, self.precipitates, self.info.nfev, self.info.message
        );
    }
}

/// one formulation with its equations assembled for a phase state
struct StageProblem<'a> {
    numsys: &'a NumSysEnum,
    eqs: EquationSet,
}

impl ResidualSystem for StageProblem<'_> {
    fn residuals(&self, y: &DVector<f64>) -> DVector<f64> {
        self.numsys.residuals(&self.eqs, y)
    }
    fn jacobian(&self, y: &DVector<f64>) -> DMatrix<f64> {
        self.numsys.jacobian(&self.eqs, y)
    }
    fn max_step(&self) -> Option<f64> {
        self.numsys.max_step()
    }
}

/// where a stage starts from
#[derive(Debug, Clone, Copy)]
enum StageStart<'b> {
    /// the formulation's own guess built from the initial concentrations
    Internal,
    /// concentrations given by the caller or produced by the previous stage
    Concentrations(&'b DVector<f64>),
}

pub struct ConditionalChainedSolver<'a, S: NonlinearSolver> {
    pub eqsys: &'a EqSystem,
    pub settings: &'a EquilibriumSettings,
    pub solver: S,
}

impl<'a> ConditionalChainedSolver<'a, DampedNewton> {
    /// damped Newton configured from `settings.newton`
    pub fn with_newton(eqsys: &'a EqSystem, settings: &'a EquilibriumSettings) -> Self {
        Self::new(eqsys, settings, DampedNewton::new(settings.newton.clone()))
    }
}

impl<'a, S: NonlinearSolver> ConditionalChainedSolver<'a, S> {
    pub fn new(eqsys: &'a EqSystem, settings: &'a EquilibriumSettings, solver: S) -> Self {
        Self {
            eqsys,
            settings,
            solver,
        }
    }

    fn n_phase_reactions(&self) -> usize {
        self.eqsys.phase_transfer_reaction_idxs().len()
    }

    fn stage_kinds(&self) -> Vec<NumSysKind> {
        if self.settings.numsys.is_empty() {
            vec![NumSysKind::Log, NumSysKind::Lin]
        } else {
            self.settings.numsys.clone()
        }
    }

    fn numsys(&self, kind: NumSysKind, state: &PhaseState) -> NumSysEnum {
        create_numsys(kind, self.settings.numsys_options(state.as_slice()))
    }

    /// phase conditions judged with the equilibrium constants in `params`
    fn conditions(&self, small: f64, params: &DVector<f64>) -> Vec<PhaseCondition> {
        PhaseCondition::for_system(self.eqsys, self.settings.phase_rtol, small)
            .into_iter()
            .map(|cond| cond.with_k(params[self.eqsys.ns + cond.reaction]))
            .collect()
    }

    /// initial concentrations followed by the equilibrium constants
    pub fn params(&self, init_concs: &[f64], eq_params: Option<&[f64]>) -> Result<DVector<f64>, EquilibriumError> {
        self.eqsys.check_len("initial concentrations", self.eqsys.ns, init_concs.len())?;
        let own = self.eqsys.eq_params();
        let ks = eq_params.unwrap_or(own.as_slice());
        self.eqsys.check_len("equilibrium constants", self.eqsys.nr, ks.len())?;
        Ok(DVector::from_iterator(
            init_concs.len() + ks.len(),
            init_concs.iter().chain(ks.iter()).cloned(),
        ))
    }

    /// one nonlinear solve of formulation `kind` in phase state `state`; returns concentrations
    fn solve_stage(
        &self,
        kind: NumSysKind,
        state: &PhaseState,
        start: StageStart,
        params: &DVector<f64>,
    ) -> Result<(DVector<f64>, SolveInfo), EquilibriumError> {
        let numsys = self.numsys(kind, state);
        let eqs = EquationSet::assemble(self.eqsys, numsys.options(), params, numsys.small())?;
        let y0 = match start {
            StageStart::Internal => {
                let init = params.rows(0, self.eqsys.ns).into_owned();
                numsys.internal_x0(self.eqsys, &init, params)
            }
            StageStart::Concentrations(x) => numsys.pre_process(self.eqsys, x, params),
        };
        let problem = StageProblem {
            numsys: &numsys,
            eqs,
        };
        let (y, info) = self.solver.solve(&problem, y0);
        debug!(
            "stage {:?} with precipitates {}: success = {}, nit = {}, |f| = {:e}",
            kind, state, info.success, info.nit, info.residual_norm
        );
        let mut x = numsys.post_process(self.eqsys, &y, params);
        // an absent solid is only pinned near zero (ln(small) in Log), make it exact
        for si in self.eqsys.absent_precipitate_idxs(state.as_slice()) {
            x[si] = 0.0;
        }
        Ok((x, info))
    }

    /// every stage of the chain in one phase state
    fn solve_chain(
        &self,
        state: &PhaseState,
        x0: Option<&DVector<f64>>,
        params: &DVector<f64>,
    ) -> Result<(DVector<f64>, SolveInfo), EquilibriumError> {
        let mut x: Option<DVector<f64>> = None;
        let mut total = SolveInfo::default();
        for kind in self.stage_kinds() {
            let start = match (&x, x0) {
                (Some(prev), _) => StageStart::Concentrations(prev),
                (None, Some(given)) => StageStart::Concentrations(given),
                (None, None) => StageStart::Internal,
            };
            let (new_x, info) = self.solve_stage(kind, state, start, params)?;
            total.chain(&info);
            x = Some(new_x);
        }
        let x = x.unwrap_or_else(|| params.rows(0, self.eqsys.ns).into_owned());
        Ok((x, total))
    }

    /// re-solves with `solve_once` while the phase state changes. Stops (unsuccessfully) after
    /// `conditional_maxiter` solves or when a phase state comes back; the last flag tells
    /// whether the phase state settled.
    fn iterate_conditions<F>(
        &self,
        conditions: &[PhaseCondition],
        initial: PhaseState,
        mut solve_once: F,
    ) -> Result<(DVector<f64>, SolveInfo, PhaseState, bool), EquilibriumError>
    where
        F: FnMut(&PhaseState) -> Result<(DVector<f64>, SolveInfo), EquilibriumError>,
    {
        let maxiter = self.settings.conditional_maxiter.max(1);
        let mut state = initial;
        let mut seen: HashSet<PhaseState> = HashSet::new();
        let mut total = SolveInfo::default();
        let mut last = None;
        for it in 0..maxiter {
            seen.insert(state.clone());
            let (x, info) = solve_once(&state)?;
            total.chain(&info);
            let next = next_phase_state(self.eqsys, conditions, &state, x.as_slice());
            if next == state {
                return Ok((x, total, state, true));
            }
            debug!("conditional iteration {}: precipitates {} -> {}", it, state, next);
            if seen.contains(&next) {
                warn!("phase state {} was visited before, conditional solve is cycling", next);
                total.success = false;
                total.message = format!("cycling phase states, stopped at {}", state);
                return Ok((x, total, state, false));
            }
            last = Some((x, std::mem::replace(&mut state, next)));
        }
        warn!(
            "phase state still changing after {} conditional iterations",
            maxiter
        );
        total.success = false;
        total.message = format!("conditional_maxiter ({}) reached", maxiter);
        // report the state the returned concentrations were solved in, not the untried one
        let (x, solved_state) =
            last.unwrap_or_else(|| (DVector::zeros(self.eqsys.ns), state));
        Ok((x, total, solved_state, false))
    }

    /// solves for the equilibrium concentrations. `x0` overrides the formulations' own starting
    /// guess of the first stage, `precipitates` fixes the initial phase state.
    pub fn solve(
        &self,
        init_concs: &[f64],
        x0: Option<&[f64]>,
        precipitates: Option<PhaseState>,
    ) -> Result<EquilibriumResult, EquilibriumError> {
        self.solve_with_params(init_concs, None, x0, precipitates)
    }

    /// as `solve` with equilibrium constants replacing those of the reactions
    pub fn solve_with_params(
        &self,
        init_concs: &[f64],
        eq_params: Option<&[f64]>,
        x0: Option<&[f64]>,
        precipitates: Option<PhaseState>,
    ) -> Result<EquilibriumResult, EquilibriumError> {
        let params = self.params(init_concs, eq_params)?;
        let x0 = match x0 {
            Some(x0) => {
                self.eqsys.check_len("x0", self.eqsys.ns, x0.len())?;
                Some(DVector::from_column_slice(x0))
            }
            None => None,
        };
        if let Some(state) = &precipitates {
            self.eqsys.check_len("precipitates", self.n_phase_reactions(), state.len())?;
        }
        let n_phase = self.n_phase_reactions();

        let (x, info, state) = match self.settings.neqsys_type {
            NeqSysType::StaticConditions => {
                let state = precipitates.unwrap_or_else(|| PhaseState::all_absent(n_phase));
                let (x, info) = self.solve_chain(&state, x0.as_ref(), &params)?;
                (x, info, state)
            }
            NeqSysType::ConditionalChained => {
                let state = precipitates.unwrap_or_else(|| PhaseState::all_absent(n_phase));
                let first = self.numsys(self.stage_kinds()[0], &state);
                let conditions = self.conditions(first.small(), &params);
                let (x, info, state, _) = self.iterate_conditions(&conditions, state, |s| {
                    self.solve_chain(s, x0.as_ref(), &params)
                })?;
                (x, info, state)
            }
            NeqSysType::ChainedConditional => {
                if precipitates.is_some() {
                    return Err(EquilibriumError::AmbiguousConfiguration(
                        "the phase state is re-evaluated at every stage of ChainedConditional, \
                         an explicit one cannot be honoured"
                            .to_string(),
                    ));
                }
                self.solve_chained_conditional(x0.as_ref(), &params)?
            }
        };

        if !info.success {
            warn!("equilibrium solve did not converge: {}", info.message);
        }
        let conc: Vec<f64> = x.iter().cloned().collect();
        let sanity = result_is_sane(self.eqsys, init_concs, &conc, self.settings.sanity_rtol);
        Ok(EquilibriumResult {
            conc,
            sane: sanity.is_sane(),
            info,
            sanity,
            precipitates: state,
        })
    }

    fn solve_chained_conditional(
        &self,
        x0: Option<&DVector<f64>>,
        params: &DVector<f64>,
    ) -> Result<(DVector<f64>, SolveInfo, PhaseState), EquilibriumError> {
        let n_phase = self.n_phase_reactions();
        let init = params.rows(0, self.eqsys.ns).into_owned();
        let mut x: Option<DVector<f64>> = None;
        let mut total = SolveInfo::default();
        let mut state = PhaseState::all_absent(n_phase);
        let mut failed_message = None;
        for kind in self.stage_kinds() {
            let small = create_numsys(kind, Default::default()).small();
            let conditions = self.conditions(small, params);
            let start_x = x.clone().or_else(|| x0.cloned());
            let probe = start_x.as_ref().unwrap_or(&init);
            let initial = next_phase_state(
                self.eqsys,
                &conditions,
                &PhaseState::all_absent(n_phase),
                probe.as_slice(),
            );
            let start = match &start_x {
                Some(sx) => StageStart::Concentrations(sx),
                None => StageStart::Internal,
            };
            let (new_x, info, new_state, settled) =
                self.iterate_conditions(&conditions, initial, |s| self.solve_stage(kind, s, start, params))?;
            if !settled && failed_message.is_none() {
                failed_message = Some(format!("{:?} stage: {}", kind, info.message));
            }
            total.chain(&info);
            x = Some(new_x);
            state = new_state;
        }
        // a later stage cannot repair a failed conditional loop
        if let Some(message) = failed_message {
            total.success = false;
            total.message = message;
        }
        let x = x.unwrap_or(init);
        Ok((x, total, state))
    }
}

impl EqSystem {
    /// equilibrium concentrations with damped Newton configured by `settings`
    pub fn root(
        &self,
        init_concs: &[f64],
        x0: Option<&[f64]>,
        settings: &EquilibriumSettings,
        precipitates: Option<PhaseState>,
    ) -> Result<EquilibriumResult, EquilibriumError> {
        info!(
            "solving equilibria of {} substances and {} reactions ({:?}, {:?})",
            self.ns, self.nr, settings.neqsys_type, settings.numsys
        );
        let result = ConditionalChainedSolver::with_newton(self, settings).solve(init_concs, x0, precipitates)?;
        info!(
            "equilibrium solve finished: success = {}, sane = {}, nfev = {}",
            result.info.success, result.sane, result.info.nfev
        );
        Ok(result)
    }
}
