use approx::assert_abs_diff_eq;
use gradir::{Expr, Function, MatExpr, Options, Sparsity};

#[test]
fn matrix_lowering_matches_elementwise_scalar_construction() {
    let xm = MatExpr::<f64>::sym("x", 2, 2);
    let ym = MatExpr::<f64>::sym("y", 2, 2);
    let m = &(&xm * &ym) + &xm.sin();
    let mat_func = Function::from_matrix(&[xm, ym], &[m], Options::default()).unwrap();

    let x = Expr::sym_vec("x", 4);
    let y = Expr::sym_vec("y", 4);
    let f: Vec<Expr<f64>> = (0..4).map(|i| &x[i] * &y[i] + x[i].sin()).collect();
    let scalar_func = Function::new(&[x, y], &[f]).unwrap();

    let xv = [0.3, -1.2, 0.8, 2.1];
    let yv = [1.5, 0.2, -0.7, 0.9];
    let a = mat_func.eval(&[&xv, &yv]).unwrap();
    let b = scalar_func.eval(&[&xv, &yv]).unwrap();
    for (av, bv) in a[0].iter().zip(&b[0]) {
        assert_abs_diff_eq!(av, bv, epsilon = 1e-14);
    }
}

#[test]
fn shared_matrix_subgraphs_lower_once() {
    // X feeds both outputs; its scalar symbols must be shared, so the
    // function sees one input vector binding both uses.
    let xm = MatExpr::<f64>::sym("x", 1, 3);
    let a = xm.sin();
    let b = &a + &xm;
    let func = Function::from_matrix(&[xm], &[a, b], Options::default()).unwrap();
    let out = func.eval(&[&[0.5, 1.0, -0.3]]).unwrap();
    for i in 0..3 {
        assert_abs_diff_eq!(out[1][i], out[0][i] + [0.5, 1.0, -0.3][i], epsilon = 1e-14);
    }
}

#[test]
fn structural_zeros_carry_no_dependencies() {
    // Diagonal symbolic X plus dense Y: the off-diagonal result elements
    // depend on Y alone.
    let diag = Sparsity::from_triplets(2, 2, &[(0, 0), (1, 1)]);
    let xm = MatExpr::<f64>::sym_with_sparsity("x", diag);
    let ym = MatExpr::<f64>::sym("y", 2, 2);
    let m = &xm + &ym;
    let func = Function::from_matrix(&[xm, ym], &[m], Options::default()).unwrap();

    // Input 0 holds the two diagonal symbols only.
    assert_eq!(func.in_size(0), 2);
    assert_eq!(func.out_size(0), 4);
    let sp = func.sparsity(0, 0, false, false).unwrap();
    // Output elements are row-major; only (0,0) and (1,1) touch x.
    assert_eq!(sp.triplets(), vec![(0, 0), (3, 1)]);
    let sp_y = func.sparsity(1, 0, false, false).unwrap();
    assert_eq!(sp_y.nnz(), 4);
}

#[test]
fn scalar_nodes_broadcast_elementwise() {
    let xm = MatExpr::<f64>::sym("x", 2, 2);
    let two = MatExpr::scalar(2.0);
    let m = &(&xm * &two) + &MatExpr::scalar(1.0);
    let func = Function::from_matrix(&[xm], &[m], Options::default()).unwrap();
    let out = func.eval(&[&[0.5, -1.0, 2.0, 0.0]]).unwrap();
    assert_eq!(out[0], vec![2.0, -1.0, 5.0, 1.0]);
}

#[test]
fn elementwise_product_keeps_the_sparse_pattern() {
    let diag = Sparsity::from_triplets(3, 3, &[(0, 0), (1, 1), (2, 2)]);
    let xm = MatExpr::<f64>::sym_with_sparsity("x", diag.clone());
    let ym = MatExpr::<f64>::sym("y", 3, 3);
    let m = &xm * &ym;
    assert_eq!(*m.sparsity(), diag);
    let dense = (&xm + &ym).sparsity().clone();
    assert!(dense.is_dense());
}
