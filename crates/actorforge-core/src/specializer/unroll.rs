//! Loop unrolling.
//!
//! Recognises counted loops of the shape
//!
//! ```text
//! head:  if i <op> n goto exit
//!        ...
//!        i = i + step
//!        goto head
//! exit:
//! ```
//!
//! where `i` starts at a constant, `n` is constant and nothing else writes
//! `i`. Each iteration becomes a copy of the body with `i` replaced by its
//! value; labels inside the body are renamed per copy.

use super::{rewrite_bodies, Context, Pass};
use crate::errors::Result;
use crate::ir::{BinOp, Body, Const, Expr, LocalDefs, Operand, Place, Stmt};
use rustc_hash::FxHashMap;
use tracing::{debug, info};

pub struct UnrollPass;

impl Pass for UnrollPass {
    fn name(&self) -> &'static str {
        "unroll"
    }

    fn applies_to(&self, config: &crate::config::SpecializerConfig) -> bool {
        config.unroll_loops
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let limit = ctx.config.max_unroll_trip_count;
        let mut unrolled = 0;
        rewrite_bodies(ctx, |_, _, _, body| {
            let n = unroll_loops(body, limit)?;
            unrolled += n;
            Ok(n > 0)
        })?;
        info!("Unrolled {} loops", unrolled);
        Ok(unrolled > 0)
    }
}

#[derive(Debug)]
struct CountedLoop {
    head: usize,
    latch: usize,
    counter: String,
    values: Vec<i32>,
    exit_value: i32,
}

/// Unroll every counted loop with at most `max_trips` iterations. Returns
/// the number of loops unrolled.
pub(super) fn unroll_loops(body: &mut Body, max_trips: usize) -> Result<usize> {
    let mut unrolled = 0;
    // Each unrolling shifts indices, so find one loop at a time.
    while let Some(found) = find_loop(body, max_trips)? {
        debug!(
            "Unrolling loop on {} at {} ({} trips)",
            found.counter,
            found.head,
            found.values.len()
        );
        expand(body, found);
        unrolled += 1;
    }
    Ok(unrolled)
}

fn find_loop(body: &Body, max_trips: usize) -> Result<Option<CountedLoop>> {
    let defs = LocalDefs::compute(body)?;
    for head in 0..body.stmts.len() {
        if let Some(found) = counted_loop(body, &defs, head, max_trips) {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn counted_loop(body: &Body, defs: &LocalDefs, head: usize, max_trips: usize) -> Option<CountedLoop> {
    let Stmt::Label(head_label) = &body.stmts[head] else {
        return None;
    };
    let Some(Stmt::If(cond, exit_label)) = body.stmts.get(head + 1) else {
        return None;
    };
    let counter = cond.lhs.as_local()?.to_string();

    // The back edge: the only jump to `head`, directly followed by the exit.
    let latch = body
        .stmts
        .iter()
        .position(|s| matches!(s, Stmt::Goto(l) if l == head_label))?;
    if latch <= head + 2 || body.label_index(exit_label) != Some(latch + 1) {
        return None;
    }
    let jumps_to_head = body
        .stmts
        .iter()
        .filter(|s| s.targets().contains(&head_label.as_str()))
        .count();
    if jumps_to_head != 1 {
        return None;
    }

    let step = match &body.stmts[latch - 1] {
        Stmt::Assign(Place::Local(local), Expr::Binary(op, Operand::Local(base), Operand::Const(Const::Int(step))))
            if *local == counter && *base == counter =>
        {
            match op {
                BinOp::Add => *step,
                BinOp::Sub => step.checked_neg()?,
                _ => return None,
            }
        }
        _ => return None,
    };
    if step == 0 {
        return None;
    }

    let counter_defs = defs.all_defs(&counter);
    let outside: Vec<usize> = counter_defs
        .iter()
        .copied()
        .filter(|d| *d != latch - 1)
        .collect();
    let [init] = outside[..] else {
        return None;
    };
    if init >= head || counter_defs.len() != 2 {
        return None;
    }
    let start = match &body.stmts[init] {
        Stmt::Assign(_, Expr::Use(Operand::Const(Const::Int(v)))) => *v,
        _ => return None,
    };
    let bound = match defs.constant_at(&cond.rhs, head + 1, body)? {
        Const::Int(n) => n,
        _ => return None,
    };

    if !body_is_closed(body, head, latch) {
        return None;
    }

    let mut values = Vec::new();
    let mut value = start;
    while !cond.op.test(value, bound) {
        if values.len() >= max_trips {
            debug!("Loop on {} exceeds {} trips", counter, max_trips);
            return None;
        }
        values.push(value);
        value = value.checked_add(step)?;
    }
    Some(CountedLoop {
        head,
        latch,
        counter,
        values,
        exit_value: value,
    })
}

/// No jump from outside the loop lands inside it.
fn body_is_closed(body: &Body, head: usize, latch: usize) -> bool {
    let inner: Vec<&str> = body.stmts[head + 1..=latch]
        .iter()
        .filter_map(|s| match s {
            Stmt::Label(l) => Some(l.as_str()),
            _ => None,
        })
        .collect();
    body.stmts.iter().enumerate().all(|(i, s)| {
        (head..=latch).contains(&i) || s.targets().iter().all(|t| !inner.contains(t))
    })
}

fn expand(body: &mut Body, found: CountedLoop) {
    let template: Vec<Stmt> = body.stmts[found.head + 2..found.latch - 1].to_vec();
    let mut replacement = Vec::new();
    for value in &found.values {
        let mut renamed: FxHashMap<String, String> = FxHashMap::default();
        for stmt in &template {
            if let Stmt::Label(l) = stmt {
                renamed.insert(l.clone(), body.new_label());
            }
        }
        let constant = Operand::int(*value);
        for stmt in &template {
            let mut copy = stmt.clone();
            copy.substitute(&found.counter, &constant);
            copy.rename_labels(&mut |l| renamed.get(l).cloned().unwrap_or_else(|| l.to_string()));
            replacement.push(copy);
        }
    }
    replacement.push(Stmt::assign_local(
        &found.counter,
        Expr::constant(Const::Int(found.exit_value)),
    ));
    body.stmts.splice(found.head..=found.latch, replacement);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BodyBuilder, Cond, CondOp, Type};

    /// `for (i = start; i < n; i += step) { if (i == 1) goto skip; sink(i); skip: }`
    fn counted(start: i32, n: Operand, step: i32) -> Body {
        let mut body = Body::new();
        body.declare("n", Type::Int);
        let mut b = BodyBuilder::new(&mut body);
        let i = b.local("$i", Type::Int);
        b.assign(&i, Expr::constant(Const::Int(start)));
        let head = b.label();
        let skip = b.label();
        let end = b.label();
        b.place_label(&head);
        b.if_goto(Cond::new(CondOp::Ge, Operand::local(&i), n), &end);
        b.if_goto(Cond::new(CondOp::Eq, Operand::local(&i), Operand::int(1)), &skip);
        b.invoke(crate::ir::InvokeExpr::static_call(
            "Sink",
            "take",
            vec![Operand::local(&i)],
            Type::Void,
        ));
        b.place_label(&skip);
        b.assign(&i, Expr::Binary(BinOp::Add, Operand::local(&i), Operand::int(step)));
        b.goto(&head);
        b.place_label(&end);
        b.ret(None);
        b.append();
        body
    }

    fn taken(body: &Body) -> Vec<Operand> {
        body.stmts
            .iter()
            .filter_map(Stmt::invoke)
            .filter(|i| i.method == "take")
            .map(|i| i.args[0].clone())
            .collect()
    }

    #[test]
    fn test_constant_loop_is_unrolled() {
        let mut body = counted(0, Operand::int(3), 1);
        assert_eq!(unroll_loops(&mut body, 16).unwrap(), 1);
        assert_eq!(taken(&body), vec![Operand::int(0), Operand::int(1), Operand::int(2)]);
        assert!(!body.stmts.iter().any(|s| matches!(s, Stmt::Goto(_))));

        // Every copy has its own skip label and its jump stays inside it.
        let labels: Vec<&String> = body
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Label(l) => Some(l),
                _ => None,
            })
            .collect();
        let mut unique = labels.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len());
    }

    #[test]
    fn test_counter_keeps_exit_value() {
        let mut body = counted(1, Operand::int(6), 2);
        unroll_loops(&mut body, 16).unwrap();
        assert_eq!(taken(&body), vec![Operand::int(1), Operand::int(3), Operand::int(5)]);
        assert!(body.stmts.iter().any(|s| matches!(
            s,
            Stmt::Assign(Place::Local(_), Expr::Use(Operand::Const(Const::Int(7))))
        )));
    }

    #[test]
    fn test_zero_trip_loop_disappears() {
        let mut body = counted(0, Operand::int(0), 1);
        assert_eq!(unroll_loops(&mut body, 16).unwrap(), 1);
        assert!(taken(&body).is_empty());
    }

    #[test]
    fn test_unknown_bound_is_left_alone() {
        let mut body = counted(0, Operand::local("n"), 1);
        let before = body.stmts.clone();
        assert_eq!(unroll_loops(&mut body, 16).unwrap(), 0);
        assert_eq!(body.stmts, before);
    }

    #[test]
    fn test_trip_limit_is_respected() {
        let mut body = counted(0, Operand::int(100), 1);
        assert_eq!(unroll_loops(&mut body, 8).unwrap(), 0);
    }
}
