use crate::Equilibria::eq_errors::EquilibriumError;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// composition key reserved for charge
pub const CHARGE_KEY: usize = 0;

/// substance taking part in the equilibria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Substance {
    pub name: String,
    /// conserved quantity id -> amount of it in one unit of the substance (0 is charge)
    pub composition: BTreeMap<usize, f64>,
    /// 0 = dissolved, anything else is a solid phase
    pub phase_idx: usize,
}

impl Substance {
    pub fn new(name: &str, composition: &[(usize, f64)]) -> Self {
        Self {
            name: name.to_string(),
            composition: composition.iter().cloned().collect(),
            phase_idx: 0,
        }
    }

    pub fn with_phase(mut self, phase_idx: usize) -> Self {
        self.phase_idx = phase_idx;
        self
    }

    pub fn is_dissolved(&self) -> bool {
        self.phase_idx == 0
    }
}

/// equilibrium reaction: signed stoichiometric coefficients (reactants negative) and the equilibrium constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub name: Option<String>,
    pub stoich: Vec<(String, f64)>,
    pub k: f64,
}

impl Reaction {
    pub fn new(stoich: &[(&str, f64)], k: f64) -> Self {
        Self {
            name: None,
            stoich: stoich.iter().map(|(s, c)| (s.to_string(), *c)).collect(),
            k,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// the solid taking part in a phase transfer reaction: its index and net coefficient
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecipitateStoich {
    pub idx: usize,
    pub coeff: f64,
}

/// product of concentrations raised to the stoichiometric powers (zero coefficients are skipped)
pub fn equilibrium_quotient(concs: &[f64], stoich: &[f64]) -> f64 {
    concs
        .iter()
        .zip(stoich.iter())
        .filter(|(_, s)| **s != 0.0)
        .map(|(c, s)| stoich_pow(*c, *s))
        .product()
}

/// c^a with integer powers kept exact (and defined for negative c)
pub fn stoich_pow(c: f64, a: f64) -> f64 {
    if a.fract() == 0.0 && a.abs() < i32::MAX as f64 {
        c.powi(a as i32)
    } else {
        c.powf(a)
    }
}

/// stoichiometry system: substances, reactions and everything derived from them.
/// Everything is validated once in `new`, afterwards the system is read-only.
#[derive(Debug, Clone)]
pub struct EqSystem {
    pub substances: Vec<Substance>,
    pub rxns: Vec<Reaction>,
    pub ns: usize,
    pub nr: usize,
    index: HashMap<String, usize>,
    /// nr x ns, rows are reactions
    net_stoich: DMatrix<f64>,
    precipitates: Vec<Option<PrecipitateStoich>>,
    /// sorted ids of every conserved quantity found in the substances (charge included)
    composition_keys: Vec<usize>,
}

impl EqSystem {
    pub fn new(substances: Vec<Substance>, rxns: Vec<Reaction>) -> Result<Self, EquilibriumError> {
        let ns = substances.len();
        let nr = rxns.len();
        let mut index = HashMap::with_capacity(ns);
        for (i, s) in substances.iter().enumerate() {
            if index.insert(s.name.clone(), i).is_some() {
                return Err(EquilibriumError::DuplicateSubstance(s.name.clone()));
            }
        }

        let mut net_stoich = DMatrix::zeros(nr, ns);
        let mut precipitates = Vec::with_capacity(nr);
        for (ri, rxn) in rxns.iter().enumerate() {
            if rxn.k < 0.0 || rxn.k.is_nan() {
                return Err(EquilibriumError::NegativeEquilibriumConstant { reaction: ri });
            }
            for (name, coeff) in &rxn.stoich {
                let si = *index
                    .get(name)
                    .ok_or_else(|| EquilibriumError::UnknownSubstance(name.clone()))?;
                net_stoich[(ri, si)] += coeff;
            }
            let mut found: Option<PrecipitateStoich> = None;
            for si in 0..ns {
                let coeff = net_stoich[(ri, si)];
                if coeff != 0.0 && !substances[si].is_dissolved() {
                    if found.is_some() {
                        return Err(EquilibriumError::MultiplePrecipitates { reaction: ri });
                    }
                    found = Some(PrecipitateStoich { idx: si, coeff });
                }
            }
            precipitates.push(found);
        }

        let composition_keys: BTreeSet<usize> = substances
            .iter()
            .flat_map(|s| s.composition.keys().cloned())
            .collect();

        Ok(Self {
            substances,
            rxns,
            ns,
            nr,
            index,
            net_stoich,
            precipitates,
            composition_keys: composition_keys.into_iter().collect(),
        })
    }

    pub fn as_substance_index(&self, name: &str) -> Result<usize, EquilibriumError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| EquilibriumError::UnknownSubstance(name.to_string()))
    }

    pub fn substance_names(&self) -> Vec<String> {
        self.substances.iter().map(|s| s.name.clone()).collect()
    }

    pub fn composition(&self, name: &str) -> Result<&BTreeMap<usize, f64>, EquilibriumError> {
        let idx = self.as_substance_index(name)?;
        Ok(&self.substances[idx].composition)
    }

    pub fn check_len(&self, what: &str, expected: usize, got: usize) -> Result<(), EquilibriumError> {
        if expected != got {
            return Err(EquilibriumError::DimensionMismatch {
                what: what.to_string(),
                expected,
                got,
            });
        }
        Ok(())
    }

    /////////////////////////////////////////STOICHIOMETRY////////////////////////////////////////////
    pub fn net_stoich_matrix(&self) -> &DMatrix<f64> {
        &self.net_stoich
    }

    pub fn net_stoich(&self, ri: usize) -> Vec<f64> {
        self.net_stoich.row(ri).iter().cloned().collect()
    }

    /// net stoichiometry with the solid removed: the solid has unit activity
    pub fn dissolved_stoich(&self, ri: usize) -> Vec<f64> {
        let mut row = self.net_stoich(ri);
        if let Some(p) = self.precipitates[ri] {
            row[p.idx] = 0.0;
        }
        row
    }

    pub fn precipitate_stoich(&self, ri: usize) -> Option<PrecipitateStoich> {
        self.precipitates[ri]
    }

    pub fn has_precipitates(&self, ri: usize) -> bool {
        self.precipitates[ri].is_some()
    }

    pub fn phase_transfer_reaction_idxs(&self) -> Vec<usize> {
        (0..self.nr).filter(|ri| self.has_precipitates(*ri)).collect()
    }

    pub fn other_phase_species_idxs(&self, phase_idx: usize) -> Vec<usize> {
        self.substances
            .iter()
            .enumerate()
            .filter(|(_, s)| s.phase_idx != phase_idx)
            .map(|(i, _)| i)
            .collect()
    }

    /// phase transfer reactions whose solid is currently absent
    pub fn non_precip_rids(&self, precipitates: &[bool]) -> Vec<usize> {
        self.phase_transfer_reaction_idxs()
            .into_iter()
            .zip(precipitates.iter())
            .filter(|(_, present)| !**present)
            .map(|(ri, _)| ri)
            .collect()
    }

    /// solids that are absent in every phase transfer reaction they take part in
    pub fn absent_precipitate_idxs(&self, precipitates: &[bool]) -> Vec<usize> {
        let mut absent = BTreeSet::new();
        let mut present = BTreeSet::new();
        for (ri, on) in self.phase_transfer_reaction_idxs().into_iter().zip(precipitates.iter()) {
            if let Some(p) = self.precipitates[ri] {
                if *on {
                    present.insert(p.idx);
                } else {
                    absent.insert(p.idx);
                }
            }
        }
        absent.difference(&present).cloned().collect()
    }

    /// exponent rows of the mass action law depending on the precipitation status.
    /// Reactions listed in `non_precip_rids` only keep a unit exponent on their solid, which
    /// together with a vanishing constant (see `eq_constants`) pins the solid to zero.
    pub fn stoichs(&self, non_precip_rids: &[usize]) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(self.nr, self.ns);
        for ri in 0..self.nr {
            match self.precipitates[ri] {
                Some(p) if non_precip_rids.contains(&ri) => {
                    a[(ri, p.idx)] = 1.0;
                }
                Some(_) => {
                    for (si, v) in self.dissolved_stoich(ri).into_iter().enumerate() {
                        a[(ri, si)] = v;
                    }
                }
                None => a.set_row(ri, &self.net_stoich.row(ri)),
            }
        }
        a
    }

    pub fn eq_params(&self) -> Vec<f64> {
        self.rxns.iter().map(|r| r.k).collect()
    }

    /// equilibrium constants, `small` in place of the reactions listed in `non_precip_rids`
    pub fn eq_constants(&self, non_precip_rids: &[usize], eq_params: Option<&[f64]>, small: f64) -> Vec<f64> {
        let own = self.eq_params();
        let eq_params = eq_params.unwrap_or(own.as_slice());
        eq_params
            .iter()
            .enumerate()
            .map(|(ri, k)| if non_precip_rids.contains(&ri) { small } else { *k })
            .collect()
    }

    /////////////////////////////////////////CONSERVATION////////////////////////////////////////////
    pub fn composition_keys(&self, include_charge: bool) -> Vec<usize> {
        self.composition_keys
            .iter()
            .cloned()
            .filter(|k| include_charge || *k != CHARGE_KEY)
            .collect()
    }

    /// one row per conserved quantity: amount of that quantity in each substance
    pub fn composition_balance_vectors(&self, include_charge: bool) -> (DMatrix<f64>, Vec<usize>) {
        let keys = self.composition_keys(include_charge);
        let b = DMatrix::from_fn(keys.len(), self.ns, |k, si| {
            *self.substances[si].composition.get(&keys[k]).unwrap_or(&0.0)
        });
        (b, keys)
    }

    /// largest concentration each substance could reach if it took all of the scarcest conserved
    /// quantity it is made of. Charge is skipped (it may be created if compensated), substances
    /// without any non-charge composition are unbounded.
    pub fn upper_conc_bounds(&self, init_concs: &[f64]) -> Vec<f64> {
        let mut composition_conc: BTreeMap<usize, f64> = self
            .composition_keys(false)
            .into_iter()
            .map(|k| (k, 0.0))
            .collect();
        for (conc, s) in init_concs.iter().zip(self.substances.iter()) {
            for (k, coeff) in &s.composition {
                if *k == CHARGE_KEY {
                    continue;
                }
                if let Some(total) = composition_conc.get_mut(k) {
                    *total += coeff * conc;
                }
            }
        }
        self.substances
            .iter()
            .map(|s| {
                s.composition
                    .iter()
                    .filter(|(k, coeff)| **k != CHARGE_KEY && **coeff != 0.0)
                    .map(|(k, coeff)| composition_conc[k] / coeff)
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }

    /// keys, B·concs and B·init_concs
    pub fn composition_conservation(
        &self,
        concs: &[f64],
        init_concs: &[f64],
        include_charge: bool,
    ) -> (Vec<usize>, DVector<f64>, DVector<f64>) {
        let (b, keys) = self.composition_balance_vectors(include_charge);
        let c = DVector::from_column_slice(concs);
        let c0 = DVector::from_column_slice(init_concs);
        (keys, &b * c, &b * c0)
    }

    /////////////////////////////////////////PHASES////////////////////////////////////////////
    /// concentrations with every solid put back into solution
    pub fn dissolved(&self, concs: &[f64]) -> DVector<f64> {
        let mut new_concs = DVector::from_column_slice(concs);
        for ri in 0..self.nr {
            if let Some(p) = self.precipitates[ri] {
                let extent = new_concs[p.idx] / p.coeff;
                new_concs -= extent * self.net_stoich.row(ri).transpose();
            }
        }
        new_concs
    }

    /// reaction quotient, solids excluded
    pub fn reaction_quotient(&self, ri: usize, concs: &[f64]) -> f64 {
        equilibrium_quotient(concs, &self.dissolved_stoich(ri))
    }

    pub fn equilibrium_quotients(&self, concs: &[f64]) -> Vec<f64> {
        (0..self.nr).map(|ri| self.reaction_quotient(ri, concs)).collect()
    }

    /////////////////////////////////////////GRIDS////////////////////////////////////////////
    /// expands `init_concs` into the outer product of the varied values.
    /// Returns grid shape, row-major rows of initial concentrations and varied substance indices.
    pub fn per_substance_varied(
        &self,
        init_concs: &[f64],
        varied: &[(String, Vec<f64>)],
    ) -> Result<(Vec<usize>, Vec<Vec<f64>>, Vec<usize>), EquilibriumError> {
        self.check_len("initial concentrations", self.ns, init_concs.len())?;
        let varied_idxs = varied
            .iter()
            .map(|(name, _)| self.as_substance_index(name))
            .collect::<Result<Vec<_>, _>>()?;
        let shape: Vec<usize> = varied.iter().map(|(_, values)| values.len()).collect();
        let n_points: usize = shape.iter().product();
        let mut all_inits = Vec::with_capacity(n_points);
        for flat in 0..n_points {
            let mut row = init_concs.to_vec();
            for (axis, coord) in unravel_index(flat, &shape).into_iter().enumerate() {
                row[varied_idxs[axis]] = varied[axis].1[coord];
            }
            all_inits.push(row);
        }
        Ok((shape, all_inits, varied_idxs))
    }
}

/// row-major flat index -> grid coordinate, last axis fastest
pub fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        index[axis] = flat % shape[axis];
        flat /= shape[axis];
    }
    index
}

/// grid coordinate -> row-major flat index
pub fn ravel_index(index: &[usize], shape: &[usize]) -> usize {
    index
        .iter()
        .zip(shape.iter())
        .fold(0, |flat, (i, n)| flat * n + i)
}
