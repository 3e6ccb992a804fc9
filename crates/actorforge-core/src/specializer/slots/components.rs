use super::{materialize, object_type};
use crate::errors::Result;
use crate::ir::{Body, Expr, InvokeKind, Place, Stmt};
use crate::specializer::{rewrite_bodies, Context, ModelRef, Pass, Resolver};
use tracing::info;

/// `getContainer()`, `getEntity(name)` and `getRelation(name)` become
/// component references. Afterwards, casts of a value known to be a
/// particular component are dropped and calls on it are bound to that
/// component's class.
pub struct ComponentSlotPass;

const ACCESSORS: &[&str] = &["getContainer", "getEntity", "getRelation"];

impl Pass for ComponentSlotPass {
    fn name(&self) -> &'static str {
        "component-slots"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let replaced = materialize(ctx, ACCESSORS)?;
        let refined = rewrite_bodies(ctx, |ctx, class, _, body| refine_body(ctx, class, body))?;
        info!(
            "Materialized {} component lookups, refined {} bodies",
            replaced, refined
        );
        Ok(replaced > 0 || refined > 0)
    }
}

fn refine_body(ctx: &Context<'_>, class: &str, body: &mut Body) -> Result<bool> {
    let this_component = ctx.component_of_class(class);
    let (casts, calls) = {
        let resolver = Resolver::new(ctx.model, &ctx.scene, this_component, body)?;
        let mut casts = Vec::new();
        let mut calls = Vec::new();
        for (i, stmt) in body.stmts.iter().enumerate() {
            if let Stmt::Assign(Place::Local(local), Expr::Cast(_, value)) = stmt {
                let single = resolver.defs().all_defs(local).len() == 1;
                let ty = resolver
                    .resolve(value, i)
                    .and_then(|target| object_type(ctx, target));
                if let (true, Some(ty)) = (single, ty) {
                    casts.push((i, local.clone(), ty));
                }
            }
            let Some(invoke) = stmt.invoke() else {
                continue;
            };
            if !matches!(invoke.kind, InvokeKind::Virtual | InvokeKind::Interface) {
                continue;
            }
            let Some(ModelRef::Component(target)) =
                invoke.base.as_ref().and_then(|base| resolver.resolve(base, i))
            else {
                continue;
            };
            let target_class = ctx.class_of(target);
            if invoke.class != target_class
                && ctx.scene.resolve_method(target_class, &invoke.method).is_some()
            {
                calls.push((i, target_class.to_string()));
            }
        }
        (casts, calls)
    };

    for (i, local, ty) in &casts {
        if let Stmt::Assign(_, expr) = &mut body.stmts[*i] {
            if let Expr::Cast(_, value) = expr {
                *expr = Expr::Use(value.clone());
            }
        }
        body.declare(local.clone(), ty.clone());
    }
    for (i, class) in &calls {
        if let Some(invoke) = body.stmts[*i].invoke_mut() {
            invoke.class = class.clone();
            invoke.kind = InvokeKind::Virtual;
        }
    }
    Ok(!casts.is_empty() || !calls.is_empty())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{body, calls, prepare};
    use super::*;
    use crate::ir::{Operand, Type};
    use crate::specializer::test_support::{context_for, model_from_yaml};
    use crate::specializer::AttributeSlotPass;
    use indoc::indoc;

    const GATED: &str = indoc! {"
        name: top
        parameters: { gain: '1' }
        entities:
          - { kind: atomic, name: source, class: Const }
          - { kind: atomic, name: work, class: Discard }
          - kind: fsm
            name: control
            ports:
              - { name: in, direction: input, type: int }
            initialState: idle
            states:
              - { name: idle, refinement: work }
              - { name: busy }
            transitions:
              - { from: idle, to: busy, guard: 'in_isPresent', commit: [{ destination: gain, expression: 'gain + 1' }] }
              - { from: busy, to: idle }
        connections:
          - { from: source.output, to: control.in, bufferSize: 1 }
    "};

    #[test]
    fn test_refinement_lookup_is_devirtualized() {
        let model = model_from_yaml(GATED);
        let mut ctx = context_for(&model);
        prepare(&mut ctx);
        AttributeSlotPass.run(&mut ctx).unwrap();
        assert!(ComponentSlotPass.run(&mut ctx).unwrap());

        let fire = body(&ctx, "generated.top_control", "fire");
        assert!(calls(fire, "getEntity").is_empty());
        assert!(calls(fire, "getContainer").is_empty());
        assert!(!fire
            .stmts
            .iter()
            .any(|s| matches!(s, Stmt::Assign(_, Expr::Cast(..)))));
        let prefire = calls(fire, "prefire");
        assert_eq!(prefire.len(), 1);
        let invoke = prefire[0].invoke().unwrap();
        assert_eq!(invoke.class, "generated.top_work");
        let local = invoke.base.as_ref().and_then(Operand::as_local).unwrap();
        assert_eq!(fire.local_type(local), Some(&Type::object("generated.top_work")));
    }

    #[test]
    fn test_container_attribute_write_reaches_top() {
        let model = model_from_yaml(GATED);
        let mut ctx = context_for(&model);
        prepare(&mut ctx);
        AttributeSlotPass.run(&mut ctx).unwrap();
        ComponentSlotPass.run(&mut ctx).unwrap();

        let postfire = body(&ctx, "generated.top_control", "postfire");
        assert!(calls(postfire, "getAttribute").is_empty());
        let set = calls(postfire, "setToken");
        assert_eq!(set.len(), 1);
        assert!(postfire.stmts.iter().any(|s| matches!(
            s,
            Stmt::Assign(_, Expr::InstanceField(_, f)) if f.class == "generated.top" && f.name == "gain"
        )));
    }

    #[test]
    fn test_rerun_is_a_fixed_point() {
        let model = model_from_yaml(GATED);
        let mut ctx = context_for(&model);
        prepare(&mut ctx);
        AttributeSlotPass.run(&mut ctx).unwrap();
        ComponentSlotPass.run(&mut ctx).unwrap();
        let before = body(&ctx, "generated.top_control", "fire").stmts.clone();
        assert!(!ComponentSlotPass.run(&mut ctx).unwrap());
        assert_eq!(body(&ctx, "generated.top_control", "fire").stmts, before);
    }
}
