///////////////////////TESTS////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use crate::Equilibria::num_sys::{
        EquationSet, NumSys, NumSysEnum, NumSysKind, NumSysOptions, create_numsys,
    };
    use crate::Equilibria::substances::{EqSystem, Reaction, Substance};
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    const ALL_KINDS: [NumSysKind; 5] = [
        NumSysKind::Lin,
        NumSysKind::LinRel,
        NumSysKind::Square,
        NumSysKind::LinTanh,
        NumSysKind::Log,
    ];

    fn system(k1: f64, k2: f64) -> EqSystem {
        let substances = vec![
            Substance::new("A", &[(1, 1.0)]),
            Substance::new("B", &[(2, 1.0)]),
            Substance::new("C", &[(1, 1.0), (2, 1.0)]),
            Substance::new("D", &[(1, 1.0), (2, 1.0)]).with_phase(1),
        ];
        let rxns = vec![
            Reaction::new(&[("A", -1.0), ("B", -1.0), ("C", 1.0)], k1),
            Reaction::new(&[("C", -1.0), ("D", 1.0)], k2),
        ];
        EqSystem::new(substances, rxns).unwrap()
    }

    fn params(init: &[f64], ks: &[f64]) -> DVector<f64> {
        DVector::from_iterator(init.len() + ks.len(), init.iter().chain(ks.iter()).cloned())
    }

    fn opts(precipitates: &[bool]) -> NumSysOptions {
        NumSysOptions {
            precipitates: precipitates.to_vec(),
            ..NumSysOptions::default()
        }
    }

    #[test]
    fn test_kind_and_small() {
        for kind in ALL_KINDS {
            let ns = create_numsys(kind, opts(&[false]));
            assert_eq!(ns.kind(), kind);
        }
        assert_eq!(create_numsys(NumSysKind::Lin, opts(&[])).small(), 0.0);
        assert_eq!(create_numsys(NumSysKind::Square, opts(&[])).small(), 1e-35);
        assert_relative_eq!(create_numsys(NumSysKind::Log, opts(&[])).small(), (-80.0_f64).exp());
        assert_eq!(create_numsys(NumSysKind::Log, opts(&[])).max_step(), Some(10.0));
        assert_eq!(create_numsys(NumSysKind::LinRel, opts(&[])).max_step(), None);
    }

    #[test]
    fn test_round_trip() {
        let eqsys = system(1e-5, 1e-2);
        let p = params(&[1e-3, 1e-3, 0.0, 0.0], &[1e-5, 1e-2]);
        let x = DVector::from_vec(vec![1e-4, 2e-4, 3e-5, 1e-6]);
        for kind in ALL_KINDS {
            let ns = create_numsys(kind, opts(&[true]));
            let back = ns.post_process(&eqsys, &ns.pre_process(&eqsys, &x, &p), &p);
            for i in 0..x.len() {
                assert_relative_eq!(back[i], x[i], max_relative = 1e-8);
            }
        }
    }

    #[test]
    fn test_unbounded_substances_scale_by_one() {
        // e- carries charge only, its bound is infinite
        let eqsys = EqSystem::new(
            vec![Substance::new("A", &[(1, 1.0)]), Substance::new("e-", &[(0, -1.0)])],
            vec![],
        )
        .unwrap();
        let p = params(&[2.0, 1.0], &[]);
        let x = DVector::from_vec(vec![1.0, 0.5]);
        let rel = create_numsys(NumSysKind::LinRel, opts(&[]));
        let y = rel.pre_process(&eqsys, &x, &p);
        assert_eq!(y, DVector::from_vec(vec![0.5, 0.5]));
    }

    #[test]
    fn test_lin_residuals_vanish_at_solution() {
        // A + B <-> C with K = 1, A = B = 0.5 gives C = 0.25
        let eqsys = system(1.0, 2.0);
        let p = params(&[0.75, 0.75, 0.0, 0.0], &[1.0, 2.0]);
        let lin = create_numsys(NumSysKind::Lin, opts(&[false]));
        let f = lin
            .residuals_at(&eqsys, &DVector::from_vec(vec![0.5, 0.5, 0.25, 0.0]), &p)
            .unwrap();
        assert_eq!(f.len(), 4);
        for v in f.iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-14);
        }
        // the absent solid is pinned to zero
        let f = lin
            .residuals_at(&eqsys, &DVector::from_vec(vec![0.5, 0.5, 0.25, 1e-3]), &p)
            .unwrap();
        assert_relative_eq!(f[1], 1e-3);
    }

    #[test]
    fn test_log_residuals_vanish_at_solution() {
        let eqsys = system(1.0, 2.0);
        let p = params(&[2.0, 2.0, 0.0, 0.0], &[1.0, 2.0]);
        // solid present: C = 1 / K2 = 0.5, A = B = sqrt(0.5)
        let a = 0.5_f64.sqrt();
        let x = DVector::from_vec(vec![a, a, 0.5, 2.0 - a - 0.5]);
        let log = create_numsys(NumSysKind::Log, opts(&[true]));
        let f = log.residuals_at(&eqsys, &x.map(|v| v.ln()), &p).unwrap();
        for v in f.iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_jacobians_match_finite_differences() {
        let eqsys = system(1.0, 2.0);
        let p = params(&[1.0, 1.0, 0.0, 0.0], &[1.0, 2.0]);
        let x = DVector::from_vec(vec![0.5, 0.6, 0.3, 0.2]);
        for precipitates in [[true], [false]] {
            for kind in ALL_KINDS {
                let ns: NumSysEnum = create_numsys(kind, opts(&precipitates));
                let eqs = EquationSet::assemble(&eqsys, ns.options(), &p, ns.small()).unwrap();
                let y = ns.pre_process(&eqsys, &x, &p);
                let jac = ns.jacobian(&eqs, &y);
                for j in 0..y.len() {
                    let h = 1e-7 * y[j].abs().max(1.0);
                    let mut yp = y.clone();
                    let mut ym = y.clone();
                    yp[j] += h;
                    ym[j] -= h;
                    let fd = (ns.residuals(&eqs, &yp) - ns.residuals(&eqs, &ym)) / (2.0 * h);
                    for i in 0..fd.len() {
                        let scale = jac[(i, j)].abs().max(1.0);
                        assert!(
                            (fd[i] - jac[(i, j)]).abs() <= 1e-5 * scale,
                            "{:?} d f{} / d y{}: analytic {} vs numeric {}",
                            kind,
                            i,
                            j,
                            jac[(i, j)],
                            fd[i]
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_rref_preserv_drops_dependent_rows() {
        // both conserved quantities always appear together
        let eqsys = EqSystem::new(
            vec![
                Substance::new("X", &[(1, 1.0), (2, 1.0)]),
                Substance::new("Y", &[(1, 1.0), (2, 1.0)]),
            ],
            vec![Reaction::new(&[("X", -1.0), ("Y", 1.0)], 3.0)],
        )
        .unwrap();
        let p = params(&[1.0, 0.0], &[3.0]);
        let plain = EquationSet::assemble(&eqsys, &opts(&[]), &p, 0.0).unwrap();
        assert_eq!(plain.n_equations(), 3);
        let reduced_opts = NumSysOptions {
            rref_preserv: true,
            ..NumSysOptions::default()
        };
        let reduced = EquationSet::assemble(&eqsys, &reduced_opts, &p, 0.0).unwrap();
        assert_eq!(reduced.n_equations(), 2);
    }

    #[test]
    fn test_rref_equil_drops_duplicate_reactions() {
        let eqsys = EqSystem::new(
            vec![Substance::new("X", &[(1, 1.0)]), Substance::new("Y", &[(1, 1.0)])],
            vec![
                Reaction::new(&[("X", -1.0), ("Y", 1.0)], 3.0),
                Reaction::new(&[("X", -2.0), ("Y", 2.0)], 9.0),
            ],
        )
        .unwrap();
        let p = params(&[1.0, 0.0], &[3.0, 9.0]);
        let reduced_opts = NumSysOptions {
            rref_equil: true,
            ..NumSysOptions::default()
        };
        let reduced = EquationSet::assemble(&eqsys, &reduced_opts, &p, 0.0).unwrap();
        assert_eq!(reduced.a.nrows(), 1);
        // X -> Y with K = 3 survives, up to the sign of the row
        let ratio = reduced.a[(0, 1)] / reduced.a[(0, 0)];
        assert_relative_eq!(ratio, -1.0);
        assert_relative_eq!(reduced.ks[0].ln().abs(), 3.0_f64.ln(), max_relative = 1e-12);
    }

    #[test]
    fn test_assemble_checks_lengths() {
        let eqsys = system(1.0, 2.0);
        let p = params(&[1.0, 1.0, 0.0], &[1.0, 2.0]);
        assert!(EquationSet::assemble(&eqsys, &opts(&[false]), &p, 0.0).is_err());
        let p = params(&[1.0, 1.0, 0.0, 0.0], &[1.0, 2.0]);
        assert!(EquationSet::assemble(&eqsys, &opts(&[]), &p, 0.0).is_err());
    }
}
