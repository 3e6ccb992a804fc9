//! Worklist-based forward dataflow over a statement CFG.

use super::cfg::Cfg;
use super::scene::Body;
use super::types::Stmt;
use std::collections::VecDeque;

/// A forward analysis: a lattice join and a per-statement transfer.
pub trait ForwardAnalysis {
    type State: Clone + PartialEq;

    /// State before the first statement.
    fn entry(&self) -> Self::State;

    /// Initial state of every other statement.
    fn bottom(&self) -> Self::State;

    /// `acc = join(acc, incoming)`
    fn join_into(&self, acc: &mut Self::State, incoming: &Self::State);

    fn transfer(&self, index: usize, stmt: &Stmt, input: &Self::State) -> Self::State;
}

/// Fixed-point IN/OUT states per statement. Unreachable statements keep
/// `bottom`.
pub fn solve_forward<A: ForwardAnalysis>(
    analysis: &A,
    body: &Body,
    cfg: &Cfg,
) -> (Vec<A::State>, Vec<A::State>) {
    let n = body.stmts.len();
    let mut in_states: Vec<A::State> = (0..n).map(|_| analysis.bottom()).collect();
    let mut out_states: Vec<A::State> = (0..n).map(|_| analysis.bottom()).collect();
    if n == 0 {
        return (in_states, out_states);
    }

    let mut work = VecDeque::new();
    let mut visited = vec![false; n];
    in_states[0] = analysis.entry();
    out_states[0] = analysis.transfer(0, &body.stmts[0], &in_states[0]);
    visited[0] = true;
    work.push_back(0);

    while let Some(i) = work.pop_front() {
        let out = out_states[i].clone();
        for &succ in &cfg.succs[i] {
            let mut new_in = in_states[succ].clone();
            analysis.join_into(&mut new_in, &out);
            // A successor is transferred on first visit even when its IN
            // still equals `bottom`.
            if visited[succ] && new_in == in_states[succ] {
                continue;
            }
            visited[succ] = true;
            in_states[succ] = new_in;
            out_states[succ] = analysis.transfer(succ, &body.stmts[succ], &in_states[succ]);
            if !work.contains(&succ) {
                work.push_back(succ);
            }
        }
    }
    (in_states, out_states)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Cond, CondOp, Expr, Operand};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// Set of locals possibly assigned so far.
    struct Assigned;

    impl ForwardAnalysis for Assigned {
        type State = BTreeSet<String>;

        fn entry(&self) -> Self::State {
            BTreeSet::new()
        }

        fn bottom(&self) -> Self::State {
            BTreeSet::new()
        }

        fn join_into(&self, acc: &mut Self::State, incoming: &Self::State) {
            acc.extend(incoming.iter().cloned());
        }

        fn transfer(&self, _: usize, stmt: &Stmt, input: &Self::State) -> Self::State {
            let mut out = input.clone();
            if let Some(def) = stmt.def() {
                out.insert(def.to_string());
            }
            out
        }
    }

    fn loop_body(extra: usize) -> Body {
        let mut body = Body::new();
        body.stmts.push(Stmt::assign_local("i", Expr::constant(crate::ir::Const::Int(0))));
        body.stmts.push(Stmt::Label("head".into()));
        body.stmts.push(Stmt::If(
            Cond::new(CondOp::Ge, Operand::local("i"), Operand::int(3)),
            "exit".into(),
        ));
        for k in 0..extra {
            body.stmts
                .push(Stmt::assign_local(format!("t{}", k), Expr::local("i")));
        }
        body.stmts.push(Stmt::assign_local(
            "i",
            Expr::Binary(BinOp::Add, Operand::local("i"), Operand::int(1)),
        ));
        body.stmts.push(Stmt::Goto("head".into()));
        body.stmts.push(Stmt::Label("exit".into()));
        body.stmts.push(Stmt::Return(None));
        body
    }

    #[test]
    fn test_loop_reaches_fixed_point() {
        let body = loop_body(1);
        let cfg = Cfg::build(&body).unwrap();
        let (ins, _) = solve_forward(&Assigned, &body, &cfg);
        let at_exit = &ins[body.label_index("exit").unwrap()];
        assert!(at_exit.contains("i"));
        assert!(at_exit.contains("t0"));
    }

    #[test]
    fn test_leading_statement_without_def_still_propagates() {
        let mut body = Body::new();
        body.stmts = vec![
            Stmt::Nop,
            Stmt::assign_local("x", Expr::constant(crate::ir::Const::Int(7))),
            Stmt::Return(None),
        ];
        let cfg = Cfg::build(&body).unwrap();
        let (ins, outs) = solve_forward(&Assigned, &body, &cfg);
        assert!(ins[1].is_empty());
        assert!(ins[2].contains("x"));
        assert!(outs[2].contains("x"));
    }

    proptest! {
        #[test]
        fn prop_solver_terminates_on_loops(extra in 0usize..20) {
            let body = loop_body(extra);
            let cfg = Cfg::build(&body).unwrap();
            let (ins, _) = solve_forward(&Assigned, &body, &cfg);
            let at_exit = &ins[body.label_index("exit").unwrap()];
            prop_assert_eq!(at_exit.len(), extra + 1);
        }
    }
}
