use crate::Equilibria::batch::EqCalcResult;
use crate::Equilibria::single_reaction::solve_equilibrium;
use crate::Equilibria::substances::{EqSystem, Reaction, Substance};
use crate::Utils::brent::Brent;
use crate::settings::{EquilibriumSettings, NeqSysType};
use approx::assert_relative_eq;

/// A + B <-> C, C <-> D(s)
fn two_reaction_system(k_precipitation: f64) -> EqSystem {
    let substances = vec![
        Substance::new("A", &[(1, 1.0)]),
        Substance::new("B", &[(2, 1.0)]),
        Substance::new("C", &[(1, 1.0), (2, 1.0)]),
        Substance::new("D", &[(1, 1.0), (2, 1.0)]).with_phase(1),
    ];
    let rxns = vec![
        Reaction::new(&[("A", -1.0), ("B", -1.0), ("C", 1.0)], 1e-5).with_name("association"),
        Reaction::new(&[("C", -1.0), ("D", 1.0)], k_precipitation).with_name("precipitation"),
    ];
    EqSystem::new(substances, rxns).unwrap()
}

fn print_result(eqsys: &EqSystem, conc: &[f64]) {
    for (name, c) in eqsys.substance_names().iter().zip(conc.iter()) {
        println!("{:>4}: {:e}", name, c);
    }
}

pub fn equilibria_examples(task: usize) {
    let init = [1e-3, 1e-3, 0.0, 0.0];
    match task {
        0 => {
            // the solid stays dissolved: C is far below its solubility
            let eqsys = two_reaction_system(1e-2);
            let settings = EquilibriumSettings::default();
            let result = eqsys.root(&init, None, &settings, None).unwrap();
            result.pretty_print(&eqsys, &init);
            println!("quotients: {:?}", eqsys.equilibrium_quotients(&result.conc));
            assert!(result.sane);
            assert_relative_eq!(result.conc[2], 1e-11, max_relative = 1e-6);
        }
        1 => {
            // the solid forms and fixes C at 1/K
            let eqsys = two_reaction_system(1e12);
            for policy in [NeqSysType::ChainedConditional, NeqSysType::ConditionalChained] {
                let settings = EquilibriumSettings::default().with_neqsys_type(policy);
                let result = eqsys.root(&init, None, &settings, None).unwrap();
                println!("{:?}: precipitates {}, nfev {}", policy, result.precipitates, result.info.nfev);
                print_result(&eqsys, &result.conc);
                let (keys, bc, bc0) = eqsys.composition_conservation(&result.conc, &init, false);
                println!("conservation of {:?}: {:?} vs {:?}", keys, bc.as_slice(), bc0.as_slice());
            }
        }
        2 => {
            // grid over the initial concentrations of A and B solved on the rayon pool
            let eqsys = two_reaction_system(1e12);
            let settings = EquilibriumSettings::default();
            let mut batch = EqCalcResult::new(
                &eqsys,
                &init,
                vec![
                    ("A".to_string(), vec![1e-6, 1e-5, 1e-4, 1e-3]),
                    ("B".to_string(), vec![1e-4, 1e-3]),
                ],
            )
            .unwrap();
            batch.solve_parallel(&settings, None);
            for (flat, init) in batch.all_inits.iter().enumerate() {
                let r = &batch.results[flat];
                println!(
                    "A0 = {:e}, B0 = {:e} -> D = {:e}, sane = {}, precipitates {}",
                    init[0], init[1], r.conc[3], r.sane, r.precipitates
                );
            }
        }
        3 => {
            // single reaction along its reaction coordinate: A <-> B, K = 2
            let c = solve_equilibrium(&[1.0, 0.0], &[-1.0, 1.0], 2.0, None, &Brent::default()).unwrap();
            println!("A = {}, B = {}", c[0], c[1]);
            assert_relative_eq!(c[1] / c[0], 2.0, max_relative = 1e-9);
        }
        4 => {
            // settings from JSON and a series where each point seeds the next one
            let json = r#"{
                "neqsys_type": "ChainedConditional",
                "numsys": ["Log", "LinRel"],
                "newton": { "max_iterations": 100 }
            }"#;
            let settings = EquilibriumSettings::from_json_str(json).unwrap();
            let eqsys = two_reaction_system(1e12);
            let series = eqsys
                .roots(&init, &[5e-4, 1e-3, 2e-3], "B", None, &settings, true)
                .unwrap();
            for r in &series {
                println!("{:?} success = {}", r.conc, r.info.success);
            }
        }
        _ => println!("no such example: {}", task),
    }
}
