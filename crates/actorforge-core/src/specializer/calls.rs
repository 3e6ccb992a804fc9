//! Call inlining.
//!
//! Lifecycle calls between generated classes, and calls into the lifecycle
//! bodies of the library base classes, are replaced by the callee's body.
//! Composites call their children's lifecycle methods, so after a few
//! rounds the top class runs the whole model in its own methods.

use super::{rewrite_bodies, Context, Pass};
use crate::errors::Result;
use crate::ir::{Body, Expr, InvokeExpr, InvokeKind, Method, Place, Stmt};
use crate::library::LIFECYCLE_CLASSES;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

pub struct CallInlinePass;

const LIFECYCLE_METHODS: &[&str] = &[
    "preinitialize",
    "initialize",
    "prefire",
    "fire",
    "postfire",
    "wrapup",
    "connectionsChanged",
];

impl Pass for CallInlinePass {
    fn name(&self) -> &'static str {
        "call-inlining"
    }

    fn applies_to(&self, config: &crate::config::SpecializerConfig) -> bool {
        config.mode == crate::config::CodegenMode::Deep
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let mut total = 0;
        for round in 0..ctx.config.max_cleanup_rounds.max(1) {
            let mut inlined = 0;
            rewrite_bodies(ctx, |ctx, class, method, body| {
                let n = inline_calls(ctx, class, method, body);
                inlined += n;
                Ok(n > 0)
            })?;
            debug!("Inlining round {}: {} calls", round, inlined);
            total += inlined;
            if inlined == 0 {
                break;
            }
        }
        info!("Inlined {} calls", total);
        Ok(total > 0)
    }
}

/// `fire`, or `fire$Source` for an overridden `fire` kept for super calls.
fn is_lifecycle(method: &str) -> bool {
    let base = method.split('$').next().unwrap_or(method);
    LIFECYCLE_METHODS.contains(&base)
}

/// The body a call at this site runs, if it may be inlined.
fn callee<'s>(ctx: &'s Context<'_>, invoke: &InvokeExpr) -> Option<(&'s str, &'s Method)> {
    if invoke.method == "<init>" || !is_lifecycle(&invoke.method) {
        return None;
    }
    let (owner, method) = ctx.scene.resolve_method(&invoke.class, &invoke.method)?;
    if method.native || method.body.is_none() {
        return None;
    }
    if owner.is_application() {
        if ctx.compute_attribute(&owner.name, &method.name).is_some() {
            return None;
        }
        return Some((owner.name.as_str(), method));
    }
    // Generated classes have no subclasses, so a virtual call on one is
    // already bound.
    let bound = matches!(invoke.kind, InvokeKind::Special | InvokeKind::Static)
        || ctx
            .scene
            .class(&invoke.class)
            .map(|c| c.is_application())
            .unwrap_or(false);
    (bound && LIFECYCLE_CLASSES.contains(&owner.name.as_str()))
        .then_some((owner.name.as_str(), method))
}

fn inline_calls(ctx: &Context<'_>, class: &str, method: &str, body: &mut Body) -> usize {
    let mut inlined = 0;
    let mut index = 0;
    while index < body.stmts.len() {
        let Some(invoke) = body.stmts[index].invoke().cloned() else {
            index += 1;
            continue;
        };
        let Some((owner, target)) = callee(ctx, &invoke) else {
            index += 1;
            continue;
        };
        if owner == class && target.name == method {
            index += 1;
            continue;
        }
        let def = body.stmts[index].def().map(str::to_string);
        let Some(callee_body) = target.body.as_ref() else {
            index += 1;
            continue;
        };
        let expansion = expand(body, &invoke, target, callee_body, def.as_deref());
        debug!(
            "{}.{}: inlined {}.{} ({} statements)",
            class,
            method,
            owner,
            target.name,
            expansion.len()
        );
        let len = expansion.len();
        body.splice(index, expansion);
        inlined += 1;
        // Calls inside the expansion wait for the next round.
        index += len;
    }
    inlined
}

/// The callee body rewritten to run in `caller`: locals and labels renamed,
/// `this` and parameters bound to the call's operands, returns turned into
/// jumps to the end.
fn expand(
    caller: &mut Body,
    invoke: &InvokeExpr,
    target: &Method,
    callee: &Body,
    def: Option<&str>,
) -> Vec<Stmt> {
    let mut locals: FxHashMap<String, String> = FxHashMap::default();
    for (name, ty) in &callee.locals {
        let fresh = caller.new_local(&format!("{}_", name.trim_start_matches('$')), ty.clone());
        locals.insert(name.clone(), fresh);
    }
    let mut labels: FxHashMap<String, String> = FxHashMap::default();
    for stmt in &callee.stmts {
        if let Stmt::Label(l) = stmt {
            labels.insert(l.clone(), caller.new_label());
        }
    }
    let end = caller.new_label();

    let mut out = Vec::new();
    if !target.is_static {
        if let (Some(this), Some(base)) = (locals.get("this"), &invoke.base) {
            out.push(Stmt::assign_local(this, Expr::Use(base.clone())));
        }
    }
    for ((param, _), arg) in target.params.iter().zip(&invoke.args) {
        if let Some(local) = locals.get(param) {
            out.push(Stmt::assign_local(local, Expr::Use(arg.clone())));
        }
    }

    let mut rename = |name: &str| locals.get(name).cloned().unwrap_or_else(|| name.to_string());
    for stmt in &callee.stmts {
        let mut stmt = stmt.clone();
        stmt.rename_locals(&mut rename);
        stmt.rename_labels(&mut |l| labels.get(l).cloned().unwrap_or_else(|| l.to_string()));
        match stmt {
            Stmt::Return(value) => {
                if let (Some(def), Some(value)) = (def, value) {
                    out.push(Stmt::Assign(Place::local(def), Expr::Use(value)));
                }
                out.push(Stmt::Goto(end.clone()));
            }
            other => out.push(other),
        }
    }
    out.push(Stmt::Label(end));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Operand, Type};
    use crate::specializer::test_support::{context_for, model_from_yaml};
    use crate::specializer::{
        AttributeSlotPass, ComponentSlotPass, CompositePass, ConnectivityPass, ExpressionPass,
        InstanceClassPass, PortSlotPass, TokenTypePass,
    };
    use indoc::indoc;

    const PIPE: &str = indoc! {"
        name: top
        entities:
          - { kind: atomic, name: source, class: Const, parameters: { value: '1' } }
          - { kind: atomic, name: sink, class: Recorder }
        relations:
          - { name: r, width: 1, bufferSize: 1, links: [source.output, sink.input] }
    "};

    fn prepared(model: &crate::model::Model) -> Context<'_> {
        let mut ctx = context_for(model);
        InstanceClassPass.run(&mut ctx).unwrap();
        CompositePass.run(&mut ctx).unwrap();
        AttributeSlotPass.run(&mut ctx).unwrap();
        PortSlotPass.run(&mut ctx).unwrap();
        ComponentSlotPass.run(&mut ctx).unwrap();
        ExpressionPass.run(&mut ctx).unwrap();
        TokenTypePass.run(&mut ctx).unwrap();
        ConnectivityPass.run(&mut ctx).unwrap();
        ctx
    }

    fn body<'a>(ctx: &'a Context<'_>, class: &str, method: &str) -> &'a Body {
        ctx.scene
            .method(class, method)
            .and_then(|m| m.body.as_ref())
            .unwrap()
    }

    fn lifecycle_calls(body: &Body) -> Vec<String> {
        body.stmts
            .iter()
            .filter_map(Stmt::invoke)
            .filter(|i| is_lifecycle(&i.method))
            .map(|i| format!("{}.{}", i.class, i.method))
            .collect()
    }

    #[test]
    fn test_alias_names_count_as_lifecycle() {
        assert!(is_lifecycle("fire"));
        assert!(is_lifecycle("initialize$Source"));
        assert!(!is_lifecycle("getToken"));
        assert!(!is_lifecycle("<init>"));
    }

    #[test]
    fn test_top_fire_absorbs_children() {
        let model = model_from_yaml(PIPE);
        let mut ctx = prepared(&model);
        assert!(CallInlinePass.run(&mut ctx).unwrap());

        let fire = body(&ctx, "generated.top", "fire");
        assert!(lifecycle_calls(fire).is_empty(), "{:?}", lifecycle_calls(fire));
        // The buffer write of the source and the read of the sink both
        // land in the top class.
        assert!(fire
            .stmts
            .iter()
            .any(|s| matches!(s, Stmt::Assign(Place::ArrayElem(..), _))));
        assert!(fire
            .stmts
            .iter()
            .any(|s| matches!(s, Stmt::Assign(_, Expr::ArrayRead(..)))));
    }

    #[test]
    fn test_returns_become_jumps_with_value() {
        let model = model_from_yaml(PIPE);
        let mut ctx = prepared(&model);
        CallInlinePass.run(&mut ctx).unwrap();
        let fire = body(&ctx, "generated.top", "fire");
        assert!(!fire.stmts[..fire.stmts.len() - 1]
            .iter()
            .any(|s| matches!(s, Stmt::Return(_))));
        // Every jump lands on a label of this body.
        for stmt in &fire.stmts {
            for target in stmt.targets() {
                assert!(fire.label_index(target).is_some(), "dangling {}", target);
            }
        }
    }

    #[test]
    fn test_library_lifecycle_bodies_are_inlined() {
        let model = model_from_yaml(PIPE);
        let mut ctx = prepared(&model);
        CallInlinePass.run(&mut ctx).unwrap();
        for method in ["preinitialize", "initialize", "wrapup"] {
            let body = body(&ctx, "generated.top", method);
            assert!(lifecycle_calls(body).is_empty(), "{}: {:?}", method, lifecycle_calls(body));
        }
    }

    #[test]
    fn test_expansion_binds_receiver_and_arguments() {
        let mut caller = Body::new();
        caller.declare("obj", Type::object("C"));
        caller.declare("r", Type::Boolean);
        let mut target = Method::new(
            "prefire",
            vec![("flag".into(), Type::Boolean)],
            Type::Boolean,
            false,
            "C",
        );
        if let Some(b) = target.body.as_mut() {
            b.stmts.push(Stmt::Return(Some(Operand::local("flag"))));
        }
        let invoke = InvokeExpr::virtual_call(
            Operand::local("obj"),
            "C",
            "prefire",
            vec![Operand::bool(true)],
            Type::Boolean,
        );
        let callee = target.body.clone().unwrap();
        let out = expand(&mut caller, &invoke, &target, &callee, Some("r"));

        let Stmt::Assign(Place::Local(this), Expr::Use(base)) = &out[0] else {
            panic!("{:?}", out[0]);
        };
        assert_ne!(this, "this");
        assert_eq!(base, &Operand::local("obj"));
        let Stmt::Assign(Place::Local(flag), Expr::Use(arg)) = &out[1] else {
            panic!("{:?}", out[1]);
        };
        assert_eq!(arg, &Operand::bool(true));
        assert_eq!(out[2], Stmt::assign_local("r", Expr::local(flag.clone())));
        assert!(matches!(&out[3], Stmt::Goto(_)));
        assert!(matches!(out.last(), Some(Stmt::Label(_))));
    }
}
