//! # Chemical equilibria
//!
//! Equilibrium concentrations of a set of substances taking part in reversible reactions,
//! some of which may transfer a substance into a solid phase.
//!
//! The mass action law of every reaction plus conservation of every composition key gives a
//! square nonlinear system. It is solved by a chain of variable transforms (`num_sys`), damped
//! Newton being run on each of them in turn, while the phase conditions decide which solids
//! are present.
//!
//! # Examples
//! ```
//! use equilibria_rs::Equilibria::substances::{EqSystem, Reaction, Substance};
//! use equilibria_rs::settings::EquilibriumSettings;
//!
//! // 2 A <-> A2
//! let eqsys = EqSystem::new(
//!     vec![Substance::new("A", &[(1, 1.0)]), Substance::new("A2", &[(1, 2.0)])],
//!     vec![Reaction::new(&[("A", -2.0), ("A2", 1.0)], 10.0)],
//! )
//! .unwrap();
//! let result = eqsys
//!     .root(&[1.0, 0.0], None, &EquilibriumSettings::default(), None)
//!     .unwrap();
//! assert!(result.info.success && result.sane);
//! assert!((result.conc[0] - 0.2).abs() < 1e-10);
//! ```

/// grids and series of equilibrium solves
pub mod batch;
pub mod eq_errors;
/// chained formulations and phase state iteration
pub mod neqsys;
/// variable transforms of the equilibrium equations
pub mod num_sys;
mod num_sys_tests;
/// when does a solid appear or dissolve
pub mod phase_conditions;
pub mod sanity;
/// single reaction solved along its reaction coordinate
pub mod single_reaction;
/// substances, reactions and the stoichiometry system built from them
pub mod substances;
