use approx::assert_abs_diff_eq;
use gradir::{EvalError, Expr, Function};

/// f(x, y) = x*y + sin(x)
fn scenario_a() -> Function<f64> {
    let x = Expr::sym("x");
    let y = Expr::sym("y");
    let f = &x * &y + x.sin();
    Function::new(&[vec![x, y]], &[vec![f]]).unwrap()
}

#[test]
fn value_forward_and_adjoint_on_a_small_graph() {
    let func = scenario_a();
    let inputs: &[&[f64]] = &[&[2.0, 3.0]];

    let out = func.eval(inputs).unwrap();
    assert_abs_diff_eq!(out[0][0], 6.0 + 2.0_f64.sin(), epsilon = 1e-14);

    let fseed = vec![vec![vec![1.0, 0.0]]];
    let aseed = vec![vec![vec![1.0]]];
    let (out, fsens, asens) = func.eval_derivs(inputs, &fseed, &aseed).unwrap();
    assert_abs_diff_eq!(out[0][0], 6.0 + 2.0_f64.sin(), epsilon = 1e-14);
    // d/dx = y + cos(x)
    assert_abs_diff_eq!(fsens[0][0][0], 3.0 + 2.0_f64.cos(), epsilon = 1e-14);
    // gradient = (y + cos(x), x)
    assert_abs_diff_eq!(asens[0][0][0], 3.0 + 2.0_f64.cos(), epsilon = 1e-14);
    assert_abs_diff_eq!(asens[0][0][1], 2.0, epsilon = 1e-14);
}

fn mixed_graph() -> Function<f64> {
    let x = Expr::sym_vec("x", 3);
    let s = x[0].sin() * x[1].cosh();
    let f0 = &s + &x[2] / (&x[0] + 2.0);
    let f1 = s.exp() - x[1].atan();
    Function::new(&[x], &[vec![f0, f1]]).unwrap()
}

#[test]
fn forward_and_adjoint_sweeps_are_dual() {
    let func = mixed_graph();
    let inputs: &[&[f64]] = &[&[0.4, -0.9, 1.7]];
    let v = [0.3, -1.1, 0.8];
    let w = [0.7, 0.2];

    let fseed = vec![vec![v.to_vec()]];
    let aseed = vec![vec![w.to_vec()]];
    let (_, fsens, asens) = func.eval_derivs(inputs, &fseed, &aseed).unwrap();

    // w . (J v) == (J^T w) . v
    let lhs: f64 = fsens[0][0].iter().zip(&w).map(|(a, b)| a * b).sum();
    let rhs: f64 = asens[0][0].iter().zip(&v).map(|(a, b)| a * b).sum();
    assert_abs_diff_eq!(lhs, rhs, epsilon = 1e-12);
}

#[test]
fn batched_forward_directions_match_single_sweeps() {
    let func = mixed_graph();
    let inputs: &[&[f64]] = &[&[0.4, -0.9, 1.7]];
    let dirs = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.2, -0.5, 0.9]];

    let batched: Vec<Vec<Vec<f64>>> = dirs.iter().map(|d| vec![d.to_vec()]).collect();
    let (_, fsens_batch, _) = func.eval_derivs(inputs, &batched, &[]).unwrap();
    for (k, d) in dirs.iter().enumerate() {
        let one = vec![vec![d.to_vec()]];
        let (_, fsens_one, _) = func.eval_derivs(inputs, &one, &[]).unwrap();
        assert_eq!(fsens_batch[k], fsens_one[0]);
    }
}

#[test]
fn seeding_a_duplicated_output_accumulates() {
    // The same expression appears as two output elements; seeding both with
    // one adjoint direction must add the contributions, not overwrite.
    let x = Expr::sym("x");
    let f = x.sin();
    let func = Function::new(&[vec![x]], &[vec![f.clone(), f]]).unwrap();
    let inputs: &[&[f64]] = &[&[0.6]];

    let aseed = vec![vec![vec![1.0, 1.0]]];
    let (_, _, asens) = func.eval_derivs(inputs, &[], &aseed).unwrap();
    assert_abs_diff_eq!(asens[0][0][0], 2.0 * 0.6_f64.cos(), epsilon = 1e-14);
}

#[test]
fn operand_erasing_rewrites_drop_irregular_operands() {
    // x*0 and x-x collapse at construction; the erased subexpression is
    // never evaluated, so a NaN input does not reach these outputs.
    let x = Expr::sym("x");
    let f0 = &x * 0.0;
    let f1 = &x - &x;
    let func = Function::new(&[vec![x]], &[vec![f0, f1]]).unwrap();
    let out = func.eval(&[&[f64::NAN]]).unwrap();
    assert_eq!(out[0], vec![0.0, 0.0]);
}

#[test]
fn zero_seed_bundles_yield_exact_zeros() {
    let func = mixed_graph();
    let inputs: &[&[f64]] = &[&[0.4, -0.9, 1.7]];
    let fseed = vec![vec![vec![0.0; 3]]];
    let aseed = vec![vec![vec![0.0; 2]]];
    let (_, fsens, asens) = func.eval_derivs(inputs, &fseed, &aseed).unwrap();
    assert!(fsens[0][0].iter().all(|&v| v == 0.0));
    assert!(asens[0][0].iter().all(|&v| v == 0.0));
}

#[test]
fn shape_mismatches_are_rejected_before_evaluation() {
    let func = scenario_a();

    assert!(matches!(
        func.eval(&[&[1.0, 2.0], &[3.0]]).unwrap_err(),
        EvalError::InputCount { expected: 1, got: 2 }
    ));
    assert!(matches!(
        func.eval(&[&[1.0]]).unwrap_err(),
        EvalError::InputShape {
            index: 0,
            expected: 2,
            got: 1
        }
    ));
    assert!(matches!(
        func.eval_derivs(&[&[1.0, 2.0]], &[vec![vec![1.0]]], &[])
            .unwrap_err(),
        EvalError::ForwardSeedShape { dir: 0, .. }
    ));
    assert!(matches!(
        func.eval_derivs(&[&[1.0, 2.0]], &[], &[vec![vec![1.0, 1.0]]])
            .unwrap_err(),
        EvalError::AdjointSeedShape { dir: 0, .. }
    ));
}
