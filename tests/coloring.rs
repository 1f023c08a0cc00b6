use approx::assert_abs_diff_eq;
use gradir::{Expr, Function};

/// Dense reference Jacobian via one forward sweep per input element.
fn reference_jacobian(func: &Function<f64>, inputs: &[&[f64]]) -> Vec<Vec<f64>> {
    let n = func.in_size(0);
    let m = func.out_size(0);
    let mut jac = vec![vec![0.0; n]; m];
    for c in 0..n {
        let mut seed = vec![0.0; n];
        seed[c] = 1.0;
        let (_, fsens, _) = func.eval_derivs(inputs, &[vec![seed]], &[]).unwrap();
        for r in 0..m {
            jac[r][c] = fsens[0][0][r];
        }
    }
    jac
}

/// Three independent dense 2x2 blocks.
fn block_diagonal() -> Function<f64> {
    let x = Expr::sym_vec("x", 6);
    let mut f = Vec::new();
    for b in 0..3 {
        f.push(&x[2 * b] * &x[2 * b + 1]);
        f.push(x[2 * b].sin() + &x[2 * b + 1] * &x[2 * b + 1]);
    }
    Function::new(&[x], &[f]).unwrap()
}

#[test]
fn independent_blocks_share_colors() {
    let func = block_diagonal();
    let jac = func.jacobian(0, 0, false, false).unwrap();
    // Two colors cover all three blocks; six one-hot seeds would be waste.
    assert_eq!(jac.n_sweeps(), 2);
    assert_eq!(jac.pattern().nnz(), 12);
}

#[test]
fn compressed_evaluation_matches_one_seed_per_column() {
    let func = block_diagonal();
    let inputs: &[&[f64]] = &[&[0.3, -1.2, 0.8, 2.1, -0.4, 1.6]];
    let jac = func.jacobian(0, 0, false, false).unwrap();
    let values = jac.eval(inputs).unwrap();
    let reference = reference_jacobian(&func, inputs);
    for (k, (r, c)) in jac.pattern().triplets().into_iter().enumerate() {
        assert_abs_diff_eq!(values[k], reference[r][c], epsilon = 1e-12);
    }
}

#[test]
fn adjoint_compression_matches_the_reference_too() {
    // Wide block: 2 outputs over 6 inputs, adjoint needs 2 sweeps while
    // forward would need up to 6, so the automatic choice goes adjoint.
    let x = Expr::sym_vec("x", 6);
    let f0 = x.iter().skip(1).fold(x[0].clone(), |acc, xi| acc + xi.sin());
    let f1 = &x[0] * &x[5];
    let func = Function::new(&[x], &[vec![f0, f1]]).unwrap();
    let inputs: &[&[f64]] = &[&[0.3, -1.2, 0.8, 2.1, -0.4, 1.6]];

    let jac = func.jacobian(0, 0, false, false).unwrap();
    assert_eq!(jac.n_sweeps(), 2);
    let values = jac.eval(inputs).unwrap();
    let reference = reference_jacobian(&func, inputs);
    for (k, (r, c)) in jac.pattern().triplets().into_iter().enumerate() {
        assert_abs_diff_eq!(values[k], reference[r][c], epsilon = 1e-12);
    }
}

#[test]
fn symmetric_blocks_reconstruct_from_star_colored_sweeps() {
    // f = A x with tridiagonal symmetric A; the Jacobian is A itself.
    let x = Expr::sym_vec("x", 3);
    let f0 = &x[0] * 2.0 + &x[1];
    let f1 = &x[0] + &x[1] * 2.0 + &x[2];
    let f2 = &x[1] + &x[2] * 2.0;
    let func = Function::new(&[x], &[vec![f0, f1, f2]]).unwrap();
    let inputs: &[&[f64]] = &[&[0.5, -1.0, 2.0]];

    let jac = func.jacobian(0, 0, false, true).unwrap();
    // Star coloring pairs the two ends of the path.
    assert_eq!(jac.n_sweeps(), 2);
    let values = jac.eval(inputs).unwrap();
    let a = [[2.0, 1.0, 0.0], [1.0, 2.0, 1.0], [0.0, 1.0, 2.0]];
    for (k, (r, c)) in jac.pattern().triplets().into_iter().enumerate() {
        assert_abs_diff_eq!(values[k], a[r][c], epsilon = 1e-12);
    }
}

#[test]
fn empty_outputs_produce_an_empty_jacobian_without_work() {
    let x = Expr::<f64>::sym_vec("x", 4);
    let func = Function::new(&[x], &[vec![]]).unwrap();
    let jac = func.jacobian(0, 0, false, false).unwrap();
    assert_eq!(jac.pattern().nrow(), 0);
    assert_eq!(jac.pattern().ncol(), 4);
    assert_eq!(jac.eval(&[&[1.0, 2.0, 3.0, 4.0]]).unwrap(), Vec::<f64>::new());
}

#[test]
fn scalar_blocks_bypass_coloring() {
    let x = Expr::<f64>::sym("x");
    let func = Function::new(&[vec![x.clone()]], &[vec![&x * &x]]).unwrap();
    let jac = func.jacobian(0, 0, false, false).unwrap();
    assert_eq!(jac.n_sweeps(), 1);
    let values = jac.eval(&[&[3.0]]).unwrap();
    assert_abs_diff_eq!(values[0], 6.0, epsilon = 1e-14);
}

#[test]
fn out_of_range_blocks_are_rejected() {
    let x = Expr::<f64>::sym("x");
    let func = Function::new(&[vec![x.clone()]], &[vec![x.sin()]]).unwrap();
    assert!(func.jacobian(1, 0, false, false).is_err());
    assert!(func.sparsity(0, 2, false, false).is_err());
}
