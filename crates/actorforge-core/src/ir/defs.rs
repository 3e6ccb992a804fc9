//! Reaching definitions and uses of locals.

use super::cfg::Cfg;
use super::dataflow::{solve_forward, ForwardAnalysis};
use super::scene::Body;
use super::types::{Const, Expr, Operand, Stmt};
use super::IrError;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Definitions reaching each statement. Parameters and `this` have no
/// defining statement and therefore never have a single definition.
#[derive(Debug)]
pub struct LocalDefs {
    reaching: Vec<BTreeSet<usize>>,
    defs_of: FxHashMap<String, Vec<usize>>,
}

struct ReachingDefs<'a> {
    body: &'a Body,
}

impl ForwardAnalysis for ReachingDefs<'_> {
    type State = BTreeSet<usize>;

    fn entry(&self) -> Self::State {
        BTreeSet::new()
    }

    fn bottom(&self) -> Self::State {
        BTreeSet::new()
    }

    fn join_into(&self, acc: &mut Self::State, incoming: &Self::State) {
        acc.extend(incoming.iter().copied());
    }

    fn transfer(&self, index: usize, stmt: &Stmt, input: &Self::State) -> Self::State {
        let Some(local) = stmt.def() else {
            return input.clone();
        };
        let mut out: BTreeSet<usize> = input
            .iter()
            .copied()
            .filter(|d| self.body.stmts[*d].def() != Some(local))
            .collect();
        out.insert(index);
        out
    }
}

impl LocalDefs {
    pub fn compute(body: &Body) -> Result<Self, IrError> {
        let cfg = Cfg::build(body)?;
        let (reaching, _) = solve_forward(&ReachingDefs { body }, body, &cfg);
        let mut defs_of: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (i, stmt) in body.stmts.iter().enumerate() {
            if let Some(local) = stmt.def() {
                defs_of.entry(local.to_string()).or_default().push(i);
            }
        }
        Ok(LocalDefs { reaching, defs_of })
    }

    /// Definitions of `local` reaching statement `at`.
    pub fn defs_at(&self, local: &str, at: usize, body: &Body) -> Vec<usize> {
        self.reaching
            .get(at)
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|d| body.stmts[*d].def() == Some(local))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The unique definition of `local` reaching `at`, provided the local is
    /// never defined elsewhere on a path to `at` and is not a parameter.
    pub fn single_def(&self, local: &str, at: usize, body: &Body) -> Option<usize> {
        let defs = self.defs_at(local, at, body);
        match defs.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Every statement defining `local`, anywhere in the body.
    pub fn all_defs(&self, local: &str) -> &[usize] {
        self.defs_of.get(local).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Constant value of `operand` at `at`: either a literal, or a local whose
    /// single reaching definition assigns a literal.
    pub fn constant_at(&self, operand: &Operand, at: usize, body: &Body) -> Option<Const> {
        match operand {
            Operand::Const(c) => Some(c.clone()),
            Operand::Local(name) => {
                let def = self.single_def(name, at, body)?;
                match &body.stmts[def] {
                    Stmt::Assign(_, Expr::Use(Operand::Const(c))) => Some(c.clone()),
                    _ => None,
                }
            }
        }
    }
}

/// Statement indices reading each local.
#[derive(Debug, Default)]
pub struct LocalUses {
    uses: FxHashMap<String, Vec<usize>>,
}

impl LocalUses {
    pub fn compute(body: &Body) -> Self {
        let mut uses: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        for (i, stmt) in body.stmts.iter().enumerate() {
            for local in stmt.uses() {
                let entry = uses.entry(local.to_string()).or_default();
                if entry.last() != Some(&i) {
                    entry.push(i);
                }
            }
        }
        LocalUses { uses }
    }

    pub fn uses_of(&self, local: &str) -> &[usize] {
        self.uses.get(local).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_used(&self, local: &str) -> bool {
        !self.uses_of(local).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Cond, CondOp};

    #[test]
    fn test_single_def_through_straight_line() {
        let mut body = Body::new();
        body.stmts = vec![
            Stmt::assign_local("x", Expr::constant(Const::Int(3))),
            Stmt::assign_local("y", Expr::local("x")),
            Stmt::Return(Some(Operand::local("y"))),
        ];
        let defs = LocalDefs::compute(&body).unwrap();
        assert_eq!(defs.single_def("x", 1, &body), Some(0));
        assert_eq!(
            defs.constant_at(&Operand::local("x"), 1, &body),
            Some(Const::Int(3))
        );
        assert_eq!(defs.constant_at(&Operand::local("y"), 2, &body), None);
    }

    #[test]
    fn test_def_after_leading_nop_reaches_return() {
        let mut body = Body::new();
        body.stmts = vec![
            Stmt::Nop,
            Stmt::assign_local("x", Expr::constant(Const::Int(7))),
            Stmt::Return(Some(Operand::local("x"))),
        ];
        let defs = LocalDefs::compute(&body).unwrap();
        assert_eq!(defs.defs_at("x", 2, &body), vec![1]);
        assert_eq!(defs.single_def("x", 2, &body), Some(1));
    }

    #[test]
    fn test_merging_defs_are_not_single() {
        let mut body = Body::new();
        body.stmts = vec![
            Stmt::assign_local("x", Expr::constant(Const::Int(1))),
            Stmt::If(
                Cond::new(CondOp::Eq, Operand::local("c"), Operand::int(0)),
                "join".into(),
            ),
            Stmt::assign_local("x", Expr::constant(Const::Int(2))),
            Stmt::Label("join".into()),
            Stmt::Return(Some(Operand::local("x"))),
        ];
        let defs = LocalDefs::compute(&body).unwrap();
        assert_eq!(defs.defs_at("x", 4, &body), vec![0, 2]);
        assert_eq!(defs.single_def("x", 4, &body), None);
        assert_eq!(defs.single_def("c", 1, &body), None);

        let uses = LocalUses::compute(&body);
        assert_eq!(uses.uses_of("x"), &[4]);
        assert!(!uses.is_used("y"));
    }
}
