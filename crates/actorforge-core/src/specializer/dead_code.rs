//! Dead object and dead code elimination.
//!
//! Each body is cleaned to a fixed point: constants are propagated and
//! folded, decided branches become jumps, unreachable statements go, and
//! assignments, immutable objects and arrays nothing reads are removed.
//! Every round can expose more work for the next one.

use super::{rewrite_bodies, Context, Pass};
use crate::errors::Result;
use crate::ir::{
    BinOp, Body, Cfg, Const, Expr, InvokeKind, LocalDefs, LocalUses, Operand, Place, Scene, Stmt,
    UnOp,
};
use crate::library::{is_immutable_class, is_token_class};
use rustc_hash::FxHashSet;
use tracing::{debug, info, warn};

pub struct DeadCodePass;

impl Pass for DeadCodePass {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let rounds = ctx.config.max_cleanup_rounds.max(1);
        let mut removed = 0;
        let changed = rewrite_bodies(ctx, |ctx, class, method, body| {
            let params: Vec<String> = ctx
                .scene
                .method(class, method)
                .map(|m| m.params.iter().map(|(p, _)| p.clone()).collect())
                .unwrap_or_default();
            let before = body.stmts.len();
            let n = cleanup(&ctx.scene, &params, body, rounds)?;
            if n > 0 {
                debug!(
                    "{}.{}: {} rewrites, {} -> {} statements",
                    class,
                    method,
                    n,
                    before,
                    body.stmts.len()
                );
            }
            removed += before.saturating_sub(body.stmts.len());
            Ok(n > 0)
        })?;
        info!("Cleaned {} bodies, removed {} statements", changed, removed);
        Ok(changed > 0)
    }
}

/// Clean `body` until nothing changes or `max_rounds` rounds have run.
/// Returns the number of rewrites.
pub(super) fn cleanup(scene: &Scene, params: &[String], body: &mut Body, max_rounds: usize) -> Result<usize> {
    let mut total = 0;
    for round in 0..max_rounds {
        let n = propagate_constants(body)?
            + fold(body)
            + remove_unreachable(body)?
            + remove_trivial_jumps(body)
            + remove_dead_assignments(scene, body)
            + remove_dead_objects(body)
            + remove_unused_locals(params, body);
        total += n;
        if n == 0 {
            return Ok(total);
        }
        if round + 1 == max_rounds {
            warn!("Cleanup stopped after {} rounds without converging", max_rounds);
        }
    }
    Ok(total)
}

/// Replace reads of locals whose single reaching definition is a literal.
fn propagate_constants(body: &mut Body) -> Result<usize> {
    let defs = LocalDefs::compute(body)?;
    let mut replaced = Vec::new();
    for (i, stmt) in body.stmts.iter().enumerate() {
        for (k, operand) in stmt.operands().into_iter().enumerate() {
            if operand.as_local().is_none() {
                continue;
            }
            if let Some(c) = defs.constant_at(operand, i, body) {
                replaced.push((i, k, c));
            }
        }
    }
    for (i, k, c) in &replaced {
        if let Some(operand) = body.stmts[*i].operands_mut().into_iter().nth(*k) {
            *operand = Operand::Const(c.clone());
        }
    }
    Ok(replaced.len())
}

fn fold(body: &mut Body) -> usize {
    let mut folded = body.stmts.iter().filter(|s| matches!(s, Stmt::Nop)).count();
    for stmt in &mut body.stmts {
        let replacement = match stmt {
            Stmt::Assign(place, expr) => fold_expr(expr).map(|c| Stmt::Assign(place.clone(), Expr::constant(c))),
            Stmt::If(cond, target) => match (cond.lhs.as_const(), cond.rhs.as_const()) {
                (Some(a), Some(b)) => cond.op.eval(a, b).map(|taken| {
                    if taken {
                        Stmt::Goto(target.clone())
                    } else {
                        Stmt::Nop
                    }
                }),
                _ => None,
            },
            Stmt::Switch { key: Operand::Const(key), cases, default } => key.as_i64().map(|key| {
                let target = cases
                    .iter()
                    .find(|(value, _)| *value == key)
                    .map(|(_, l)| l.clone())
                    .unwrap_or_else(|| default.clone());
                Stmt::Goto(target)
            }),
            _ => None,
        };
        if let Some(replacement) = replacement {
            *stmt = replacement;
            folded += 1;
        }
    }
    body.stmts.retain(|s| !matches!(s, Stmt::Nop));
    folded
}

/// The constant an expression over literals evaluates to. Integer division
/// by zero is left for run time.
fn fold_expr(expr: &Expr) -> Option<Const> {
    match expr {
        Expr::Binary(op, Operand::Const(a), Operand::Const(b)) => fold_binary(*op, a, b),
        Expr::Unary(op, Operand::Const(a)) => match (op, a) {
            (UnOp::Neg, Const::Int(v)) => Some(Const::Int(v.wrapping_neg())),
            (UnOp::Neg, Const::Long(v)) => Some(Const::Long(v.wrapping_neg())),
            (UnOp::Neg, Const::Double(v)) => Some(Const::Double(-v)),
            (UnOp::Not, Const::Bool(v)) => Some(Const::Bool(!v)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_binary(op: BinOp, a: &Const, b: &Const) -> Option<Const> {
    if let BinOp::Cmp(cond) = op {
        return cond.eval(a, b).map(Const::Bool);
    }
    match (a, b) {
        (Const::Bool(x), Const::Bool(y)) => match op {
            BinOp::And => Some(Const::Bool(*x && *y)),
            BinOp::Or => Some(Const::Bool(*x || *y)),
            BinOp::Xor => Some(Const::Bool(x != y)),
            _ => None,
        },
        (Const::Int(x), Const::Int(y)) => {
            let (x, y) = (*x, *y);
            Some(Const::Int(match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::Div if y != 0 => x.wrapping_div(y),
                BinOp::Rem if y != 0 => x.wrapping_rem(y),
                BinOp::And => x & y,
                BinOp::Or => x | y,
                BinOp::Xor => x ^ y,
                _ => return None,
            }))
        }
        (Const::Double(_), _) | (_, Const::Double(_)) => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            Some(Const::Double(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Rem => x % y,
                _ => return None,
            }))
        }
        _ => {
            let (x, y) = (a.as_i64()?, b.as_i64()?);
            Some(Const::Long(match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::Div if y != 0 => x.wrapping_div(y),
                BinOp::Rem if y != 0 => x.wrapping_rem(y),
                BinOp::And => x & y,
                BinOp::Or => x | y,
                BinOp::Xor => x ^ y,
                _ => return None,
            }))
        }
    }
}

fn remove_unreachable(body: &mut Body) -> Result<usize> {
    let reachable = Cfg::build(body)?.reachable();
    let before = body.stmts.len();
    let mut i = 0;
    body.stmts.retain(|_| {
        let keep = reachable[i];
        i += 1;
        keep
    });
    Ok(before - body.stmts.len())
}

/// Jumps to the next statement and labels nothing jumps to.
fn remove_trivial_jumps(body: &mut Body) -> usize {
    let mut removed = 0;
    let mut i = 0;
    while i < body.stmts.len() {
        let next_label = match body.stmts.get(i + 1) {
            Some(Stmt::Label(l)) => Some(l.as_str()),
            _ => None,
        };
        let trivial = match &body.stmts[i] {
            Stmt::Goto(target) | Stmt::If(_, target) => next_label == Some(target.as_str()),
            _ => false,
        };
        if trivial {
            body.stmts.remove(i);
            removed += 1;
        } else {
            i += 1;
        }
    }

    let targeted: FxHashSet<String> = body
        .stmts
        .iter()
        .flat_map(|s| s.targets().into_iter().map(str::to_string))
        .collect();
    let before = body.stmts.len();
    body.stmts
        .retain(|s| !matches!(s, Stmt::Label(l) if !targeted.contains(l)));
    removed + before - body.stmts.len()
}

/// Whether evaluating `expr` can be skipped when its result is unused.
fn is_pure(scene: &Scene, expr: &Expr) -> bool {
    match expr {
        Expr::Use(_)
        | Expr::Unary(..)
        | Expr::Cast(..)
        | Expr::InstanceOf(..)
        | Expr::InstanceField(..)
        | Expr::StaticField(_) => true,
        Expr::Binary(op, _, divisor) => match op {
            BinOp::Div | BinOp::Rem => matches!(
                divisor.as_const(),
                Some(c) if c.as_i64().map(|v| v != 0).unwrap_or(false) || matches!(c, Const::Double(_))
            ),
            _ => true,
        },
        Expr::NewArray(_, size) => matches!(size.as_const().and_then(Const::as_i64), Some(n) if n >= 0),
        Expr::Invoke(invoke) => {
            invoke.kind != InvokeKind::Special
                && scene
                    .resolve_method(&invoke.class, &invoke.method)
                    .map(|(owner, m)| m.native && is_token_class(&owner.name))
                    .unwrap_or(false)
        }
        Expr::New(_) | Expr::Length(_) | Expr::ArrayRead(..) => false,
    }
}

/// Assignments to locals nothing reads. Impure calls keep running with
/// their result discarded.
fn remove_dead_assignments(scene: &Scene, body: &mut Body) -> usize {
    let uses = LocalUses::compute(body);
    let mut removed = 0;
    let stmts = std::mem::take(&mut body.stmts);
    for stmt in stmts {
        let dead = match &stmt {
            Stmt::Assign(Place::Local(local), Expr::Use(Operand::Local(source))) if local == source => true,
            Stmt::Assign(Place::Local(local), _) => !uses.is_used(local),
            _ => false,
        };
        if !dead {
            body.stmts.push(stmt);
            continue;
        }
        match stmt {
            Stmt::Assign(_, expr) if is_pure(scene, &expr) => removed += 1,
            Stmt::Assign(_, Expr::Invoke(invoke)) => {
                body.stmts.push(Stmt::Invoke(invoke));
                removed += 1;
            }
            other => body.stmts.push(other),
        }
    }
    removed
}

/// Unused immutable objects with their constructor calls, and arrays that
/// are only ever written.
fn remove_dead_objects(body: &mut Body) -> usize {
    let uses = LocalUses::compute(body);
    let mut doomed: FxHashSet<usize> = FxHashSet::default();
    for (i, stmt) in body.stmts.iter().enumerate() {
        let Stmt::Assign(Place::Local(local), expr) = stmt else {
            continue;
        };
        let users = uses.uses_of(local);
        if body.stmts.iter().filter(|s| s.def() == Some(local.as_str())).count() != 1 {
            continue;
        }
        let removable = match expr {
            Expr::New(class) if is_immutable_class(class) => users.iter().all(|&u| {
                matches!(
                    &body.stmts[u],
                    Stmt::Invoke(invoke)
                        if invoke.kind == InvokeKind::Special
                            && invoke.method == "<init>"
                            && invoke.base_local() == Some(local.as_str())
                            && !invoke.args.iter().any(|a| a.as_local() == Some(local.as_str()))
                )
            }),
            Expr::NewArray(_, size) if matches!(size.as_const().and_then(Const::as_i64), Some(n) if n >= 0) => {
                users.iter().all(|&u| {
                    matches!(
                        &body.stmts[u],
                        Stmt::Assign(Place::ArrayElem(Operand::Local(array), _), value)
                            if array == local
                                && value.operands().iter().all(|o| o.as_local() != Some(local.as_str()))
                                && matches!(value, Expr::Use(_))
                    )
                })
            }
            _ => false,
        };
        if removable {
            doomed.insert(i);
            doomed.extend(users.iter().copied());
        }
    }
    if doomed.is_empty() {
        return 0;
    }
    let mut i = 0;
    body.stmts.retain(|_| {
        let keep = !doomed.contains(&i);
        i += 1;
        keep
    });
    doomed.len()
}

fn remove_unused_locals(params: &[String], body: &mut Body) -> usize {
    let mentioned: FxHashSet<String> = body
        .stmts
        .iter()
        .flat_map(|s| s.uses().into_iter().chain(s.def()).map(str::to_string))
        .collect();
    let before = body.locals.len();
    body.locals
        .retain(|name, _| name == "this" || params.contains(name) || mentioned.contains(name));
    before - body.locals.len()
}
