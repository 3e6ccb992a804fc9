//! Statement-level control-flow graph.

use super::scene::Body;
use super::types::Stmt;
use super::IrError;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct Cfg {
    pub succs: Vec<Vec<usize>>,
    pub preds: Vec<Vec<usize>>,
}

impl Cfg {
    pub fn build(body: &Body) -> Result<Self, IrError> {
        let labels: FxHashMap<&str, usize> = body
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Stmt::Label(l) => Some((l.as_str(), i)),
                _ => None,
            })
            .collect();

        let n = body.stmts.len();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for (i, stmt) in body.stmts.iter().enumerate() {
            if stmt.falls_through() && i + 1 < n {
                succs[i].push(i + 1);
            }
            for target in stmt.targets() {
                let j = *labels
                    .get(target)
                    .ok_or_else(|| IrError::UnknownLabel(target.to_string()))?;
                if !succs[i].contains(&j) {
                    succs[i].push(j);
                }
            }
            for j in succs[i].clone() {
                preds[j].push(i);
            }
        }
        Ok(Cfg { succs, preds })
    }

    pub fn len(&self) -> usize {
        self.succs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.succs.is_empty()
    }

    /// Statements reachable from the entry.
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        if self.is_empty() {
            return seen;
        }
        let mut work = VecDeque::from([0]);
        seen[0] = true;
        while let Some(i) = work.pop_front() {
            for &s in &self.succs[i] {
                if !seen[s] {
                    seen[s] = true;
                    work.push_back(s);
                }
            }
        }
        seen
    }
}
