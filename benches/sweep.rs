use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gradir::{Expr, Function};

/// Chained transcendental expression over a 32-element input.
fn chained(n_stages: usize) -> Function<f64> {
    let x = Expr::sym_vec("x", 32);
    let mut acc: Vec<Expr<f64>> = x.clone();
    for _ in 0..n_stages {
        acc = (0..32)
            .map(|i| (&acc[i] * &acc[(i + 1) % 32]).sin() + &acc[i].tanh())
            .collect();
    }
    Function::new(&[x], &[acc]).unwrap()
}

fn bench_sweeps(c: &mut Criterion) {
    let func = chained(8);
    let inputs: Vec<f64> = (0..32).map(|i| 0.1 + 0.01 * i as f64).collect();
    let input_refs: &[&[f64]] = &[&inputs];
    let mut ws = func.workspace();

    c.bench_function("value", |b| {
        b.iter(|| func.eval_with(&mut ws, black_box(input_refs)).unwrap())
    });

    let fseed = vec![vec![vec![1.0; 32]]];
    c.bench_function("forward", |b| {
        b.iter(|| {
            func.eval_derivs(black_box(input_refs), &fseed, &[])
                .unwrap()
        })
    });

    let aseed = vec![vec![vec![1.0; 32]]];
    c.bench_function("adjoint", |b| {
        b.iter(|| {
            func.eval_derivs(black_box(input_refs), &[], &aseed)
                .unwrap()
        })
    });

    let jac = func.jacobian(0, 0, false, false).unwrap();
    c.bench_function("compressed_jacobian", |b| {
        b.iter(|| jac.eval(black_box(input_refs)).unwrap())
    });
}

criterion_group!(benches, bench_sweeps);
criterion_main!(benches);
