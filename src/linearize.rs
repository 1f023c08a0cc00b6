//! Graph linearization: topological scheduling, instruction emission and
//! live-range work-slot allocation.
//!
//! Two schedules are offered. The depth-first order descends into the
//! heaviest operand first, so large shared subexpressions are computed early
//! and leaves land next to their consumers. The breadth-first order buckets
//! nodes by dependency level and then runs a postponement pass that sinks
//! every node to the latest level still preceding all of its consumers,
//! shrinking live ranges. Both orders evaluate to identical values; they
//! differ only in instruction order and work-vector size.
//!
//! Traversals never touch the nodes themselves: visited state lives in
//! per-call hash maps keyed on node identity, so shared graphs can be
//! linearized from several threads at once.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::algorithm::{Algorithm, Instr};
use crate::error::ConstructError;
use crate::float::Float;
use crate::node::{DagNode, Expr};
use crate::opcode::{OpCode, UNUSED};

/// Instruction scheduling order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Ordering {
    /// Heaviest-operand-first depth-first post-order.
    #[default]
    DepthFirst,
    /// Level scheduling with a live-range postponement pass.
    BreadthFirst,
}

pub(crate) struct LinearizeOpts {
    pub ordering: Ordering,
    /// When false, every result gets a fresh work slot (no reuse).
    pub live_variables: bool,
}

/// Post-order over the DAG reachable from `roots`, heaviest operand first.
///
/// Weight of a node is the size of its dependency tree (shared subtrees
/// counted once per reference), a cheap proxy for "most transitive
/// dependencies". Deterministic for a given graph.
pub(crate) fn sort_depth_first<N: DagNode>(roots: &[N]) -> Vec<N> {
    let weights = subtree_weights(roots);

    let mut order: Vec<N> = Vec::new();
    let mut visited: FxHashSet<usize> = FxHashSet::default();
    // Frame: node plus its operand visit order and a cursor into it.
    let mut stack: Vec<(N, Vec<usize>, usize)> = Vec::new();

    for root in roots {
        if !visited.insert(root.key()) {
            continue;
        }
        stack.push((root.clone(), operand_order(root, &weights), 0));
        while let Some(top) = stack.last_mut() {
            if top.2 < top.1.len() {
                let dep = top.0.dep(top.1[top.2]);
                top.2 += 1;
                if visited.insert(dep.key()) {
                    let ord = operand_order(&dep, &weights);
                    stack.push((dep, ord, 0));
                }
            } else {
                let (node, _, _) = stack.pop().unwrap();
                order.push(node);
            }
        }
    }
    order
}

/// Operand indices of `node`, heaviest subtree first (stable on ties).
fn operand_order<N: DagNode>(node: &N, weights: &FxHashMap<usize, u64>) -> Vec<usize> {
    let mut ord: Vec<usize> = (0..node.ndep()).collect();
    ord.sort_by_key(|&i| std::cmp::Reverse(weights[&node.dep(i).key()]));
    ord
}

/// Dependency-tree size per node, memoized across shared subtrees.
fn subtree_weights<N: DagNode>(roots: &[N]) -> FxHashMap<usize, u64> {
    let mut weights: FxHashMap<usize, u64> = FxHashMap::default();
    let mut stack: Vec<(N, usize)> = Vec::new();
    for root in roots {
        if weights.contains_key(&root.key()) {
            continue;
        }
        stack.push((root.clone(), 0));
        while let Some(top) = stack.last_mut() {
            if top.1 < top.0.ndep() {
                let dep = top.0.dep(top.1);
                top.1 += 1;
                if !weights.contains_key(&dep.key()) {
                    stack.push((dep, 0));
                }
            } else {
                let (node, _) = stack.pop().unwrap();
                let mut w = 1u64;
                for i in 0..node.ndep() {
                    w += weights[&node.dep(i).key()];
                }
                weights.insert(node.key(), w);
            }
        }
    }
    weights
}

/// Level-scheduled order: bucket nodes by dependency level, then sink each
/// node to the latest level preceding all of its consumers.
pub(crate) fn sort_breadth_first<N: DagNode>(roots: &[N]) -> Vec<N> {
    let topo = sort_depth_first(roots);
    if topo.is_empty() {
        return topo;
    }

    // As-soon-as-possible level: leaves at 0, ops one past their deepest
    // operand. Children precede parents in `topo`.
    let mut level: FxHashMap<usize, usize> = FxHashMap::default();
    let mut max_level = 0usize;
    for node in &topo {
        let l = if node.ndep() == 0 {
            0
        } else {
            1 + (0..node.ndep())
                .map(|i| level[&node.dep(i).key()])
                .max()
                .unwrap_or(0)
        };
        max_level = max_level.max(l);
        level.insert(node.key(), l);
    }

    // Postponement: walk parents before children, pinning output roots to
    // the last level and sinking everything else just below its earliest
    // consumer.
    let root_keys: FxHashSet<usize> = roots.iter().map(|r| r.key()).collect();
    let mut late: FxHashMap<usize, usize> = FxHashMap::default();
    for node in topo.iter().rev() {
        let mut l = *late.get(&node.key()).unwrap_or(&usize::MAX);
        if root_keys.contains(&node.key()) {
            l = l.min(max_level);
        }
        late.insert(node.key(), l);
        if l > 0 {
            for i in 0..node.ndep() {
                let dk = node.dep(i).key();
                let entry = late.entry(dk).or_insert(usize::MAX);
                *entry = (*entry).min(l - 1);
            }
        }
    }

    // Stable rebucket by postponed level; ties keep depth-first order.
    let mut order: Vec<(usize, usize, N)> = topo
        .into_iter()
        .enumerate()
        .map(|(pos, n)| (late[&n.key()], pos, n))
        .collect();
    order.sort_by_key(|entry| (entry.0, entry.1));
    order.into_iter().map(|(_, _, n)| n).collect()
}

/// Lower declared input/output expression vectors into an [`Algorithm`].
pub(crate) fn linearize<F: Float>(
    inputs: &[Vec<Expr<F>>],
    outputs: &[Vec<Expr<F>>],
    opts: &LinearizeOpts,
) -> Result<Algorithm<F>, ConstructError> {
    if outputs.is_empty() {
        return Err(ConstructError::NoOutputs);
    }

    // Inputs must be pure symbols, each declared once.
    let mut input_of: FxHashMap<usize, (u32, u32)> = FxHashMap::default();
    for (iind, vec) in inputs.iter().enumerate() {
        for (element, e) in vec.iter().enumerate() {
            if e.op() != OpCode::Sym {
                return Err(ConstructError::NonSymbolicInput {
                    index: iind,
                    element,
                });
            }
            if input_of
                .insert(e.key(), (iind as u32, element as u32))
                .is_some()
            {
                return Err(ConstructError::DuplicateInput {
                    name: e.sym_name().unwrap_or_default().to_string(),
                });
            }
        }
    }

    let roots: Vec<Expr<F>> = outputs.iter().flatten().cloned().collect();
    let schedule = match opts.ordering {
        Ordering::DepthFirst => sort_depth_first(&roots),
        Ordering::BreadthFirst => sort_breadth_first(&roots),
    };

    // Reachable symbols must all be declared; report the strays by name.
    let mut free_vars: Vec<String> = schedule
        .iter()
        .filter(|n| n.op() == OpCode::Sym && !input_of.contains_key(&n.key()))
        .map(|n| n.sym_name().unwrap_or_default().to_string())
        .collect();
    if !free_vars.is_empty() {
        free_vars.sort();
        free_vars.dedup();
        return Err(ConstructError::FreeVariables { names: free_vars });
    }

    // Emit instructions over virtual registers (one per distinct value),
    // deduplicating constants through the pool and repeated operations
    // through the CSE table. Work slots come later.
    let mut instrs: Vec<Instr> = Vec::with_capacity(schedule.len());
    let mut vreg_of: FxHashMap<usize, u32> = FxHashMap::default();
    let mut const_pool: Vec<F> = Vec::new();
    let mut const_ids: FxHashMap<u64, u32> = FxHashMap::default();
    let mut cse: FxHashMap<(OpCode, u32, u32), u32> = FxHashMap::default();
    let mut next_vreg = 0u32;

    for node in &schedule {
        match node.op() {
            OpCode::Sym => {
                let (iind, element) = input_of[&node.key()];
                let res = next_vreg;
                next_vreg += 1;
                vreg_of.insert(node.key(), res);
                instrs.push(Instr {
                    op: OpCode::Input,
                    arg: [iind, element],
                    res,
                });
            }
            OpCode::Const => {
                let v = node.as_const().unwrap_or_default();
                let pool_idx = *const_ids.entry(v.to_key_bits()).or_insert_with(|| {
                    const_pool.push(v);
                    (const_pool.len() - 1) as u32
                });
                let cse_key = (OpCode::Const, pool_idx, UNUSED);
                if let Some(&existing) = cse.get(&cse_key) {
                    vreg_of.insert(node.key(), existing);
                    continue;
                }
                let res = next_vreg;
                next_vreg += 1;
                cse.insert(cse_key, res);
                vreg_of.insert(node.key(), res);
                instrs.push(Instr {
                    op: OpCode::Const,
                    arg: [pool_idx, UNUSED],
                    res,
                });
            }
            op => {
                let a = vreg_of[&node.dep(0).key()];
                let b = if op.ndeps() == 2 {
                    vreg_of[&node.dep(1).key()]
                } else {
                    UNUSED
                };
                let cse_key = (op, a, b);
                if let Some(&existing) = cse.get(&cse_key) {
                    vreg_of.insert(node.key(), existing);
                    continue;
                }
                let res = next_vreg;
                next_vreg += 1;
                cse.insert(cse_key, res);
                vreg_of.insert(node.key(), res);
                instrs.push(Instr { op, arg: [a, b], res });
            }
        }
    }

    for (oind, vec) in outputs.iter().enumerate() {
        for (element, e) in vec.iter().enumerate() {
            instrs.push(Instr {
                op: OpCode::Output,
                arg: [vreg_of[&e.key()], element as u32],
                res: oind as u32,
            });
        }
    }

    let (worksize, n_tape) = allocate_slots(&mut instrs, next_vreg as usize, opts.live_variables);

    debug!(
        "linearized: {} instructions, {} work slots ({} values), {} constants",
        instrs.len(),
        worksize,
        next_vreg,
        const_pool.len()
    );

    Ok(Algorithm {
        instrs,
        constants: const_pool,
        worksize,
        n_tape,
        in_shapes: inputs.iter().map(Vec::len).collect(),
        out_shapes: outputs.iter().map(Vec::len).collect(),
    })
}

/// Rewrite virtual registers into work slots with last-use reuse.
///
/// Operand counts are decremented in reverse operand order before the result
/// slot is drawn, so a dying first operand tops the free stack and the
/// instruction computes in place. Returns (work size, taped instruction
/// count).
fn allocate_slots(instrs: &mut [Instr], n_vreg: usize, live_variables: bool) -> (usize, usize) {
    let mut refcount = vec![0u32; n_vreg];
    let mut n_tape = 0usize;
    for ins in instrs.iter() {
        match ins.op {
            OpCode::Input | OpCode::Const => {}
            OpCode::Output => refcount[ins.arg[0] as usize] += 1,
            op => {
                n_tape += 1;
                for k in 0..op.ndeps() {
                    refcount[ins.arg[k] as usize] += 1;
                }
            }
        }
    }

    let mut place = vec![UNUSED; n_vreg];
    let mut free: Vec<u32> = Vec::new();
    let mut worksize = 0usize;
    for ins in instrs.iter_mut() {
        // Reads: translate and release dead operands, last operand first.
        let n_reads = match ins.op {
            OpCode::Input | OpCode::Const => 0,
            OpCode::Output => 1,
            op => op.ndeps(),
        };
        for k in (0..n_reads).rev() {
            let vreg = ins.arg[k] as usize;
            let slot = place[vreg];
            debug_assert_ne!(slot, UNUSED);
            ins.arg[k] = slot;
            refcount[vreg] -= 1;
            if refcount[vreg] == 0 && live_variables {
                free.push(slot);
            }
        }
        // Result allocation.
        if ins.op != OpCode::Output {
            let slot = match free.pop() {
                Some(s) => s,
                None => {
                    worksize += 1;
                    (worksize - 1) as u32
                }
            };
            place[ins.res as usize] = slot;
            ins.res = slot;
        }
    }
    (worksize, n_tape)
}
