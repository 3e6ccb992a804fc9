//! Parameter access.
//!
//! Once slots are materialized, `getToken`/`setToken` calls have a receiver
//! known to be one particular attribute. Constant attributes become token
//! constructions; the others go through their token field or compute
//! method.

use super::{rewrite_bodies, Context, ModelRef, Resolver};
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{Body, BodyBuilder, Const, Expr, InvokeExpr, Operand};
use crate::library::tokens::{emit_token, token_type};
use crate::model::AttributeId;
use tracing::debug;

const METHODS: &[&str] = &["getToken", "setToken", "getExpression"];

/// Rewrite every parameter access in application code. Returns the number
/// of calls replaced.
pub(super) fn inline_parameters(ctx: &mut Context<'_>) -> Result<usize> {
    let mut replaced = 0;
    rewrite_bodies(ctx, |ctx, class, method, body| {
        let n = inline_body(ctx, class, method, body)?;
        replaced += n;
        Ok(n > 0)
    })?;
    Ok(replaced)
}

fn inline_body(ctx: &Context<'_>, class: &str, method: &str, body: &mut Body) -> Result<usize> {
    let sites: Vec<(usize, AttributeId)> = {
        let resolver = Resolver::new(ctx.model, &ctx.scene, ctx.component_of_class(class), body)?;
        body.stmts
            .iter()
            .enumerate()
            .filter_map(|(i, stmt)| {
                let invoke = stmt.invoke()?;
                if !METHODS.contains(&invoke.method.as_str()) {
                    return None;
                }
                match resolver.resolve(invoke.base.as_ref()?, i)? {
                    ModelRef::Attribute(attribute) => Some((i, attribute)),
                    _ => None,
                }
            })
            .collect()
    };

    let this_component = ctx.component_of_class(class);
    for &(index, attribute) in sites.iter().rev() {
        let stmt = &body.stmts[index];
        let def = stmt.def().map(str::to_string);
        let Some(invoke) = stmt.invoke().cloned() else {
            continue;
        };
        let location = Location::method(class, method).at(index);
        let mut b = BodyBuilder::new(body);
        match invoke.method.as_str() {
            "getToken" => {
                let value = read_token(ctx, &mut b, this_component, attribute)
                    .map_err(|e| e.located(location))?;
                if let Some(def) = &def {
                    b.assign(def, Expr::local(value));
                }
            }
            "setToken" => {
                let field = ctx.token_field(attribute).cloned().ok_or_else(|| {
                    SpecializeError::invariant(
                        location,
                        format!(
                            "`{}` is set at run time but has no token field",
                            ctx.model.attribute_full_name(attribute)
                        ),
                    )
                })?;
                let value = invoke.args.first().cloned().unwrap_or_else(Operand::null);
                let owner = ctx.model.attribute_component(attribute);
                let base = ctx.emit_component_ref(&mut b, this_component, owner)?;
                b.set_field(base, field, value);
            }
            _ => {
                let text = ctx
                    .model
                    .attribute(attribute)
                    .expression
                    .clone()
                    .unwrap_or_default();
                if let Some(def) = &def {
                    b.assign(def, Expr::constant(Const::Str(text)));
                }
            }
        }
        let stmts = b.finish();
        debug!(
            "{}.{}: {} on {} inlined",
            class,
            method,
            invoke.method,
            ctx.model.attribute_full_name(attribute)
        );
        body.splice(index, stmts);
    }
    Ok(sites.len())
}

/// Code producing the current token of `attribute`; returns the local
/// holding it.
pub(super) fn read_token(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    from: Option<crate::model::ComponentId>,
    attribute: AttributeId,
) -> Result<String> {
    let model = ctx.model;
    if ctx.constants.is_constant(attribute) {
        if let Some(value) = &model.attribute(attribute).value {
            return Ok(emit_token(b, value));
        }
    }
    let owner = model.attribute_component(attribute);
    if let Some(field) = ctx.token_field(attribute).cloned() {
        let base = ctx.emit_component_ref(b, from, owner)?;
        return Ok(b.get_field(base, field, token_type()));
    }
    if let Some((class, method)) = ctx.compute_method(attribute) {
        let base = ctx.emit_component_ref(b, from, owner)?;
        return Ok(b.call(
            "$t",
            InvokeExpr::virtual_call(base, class, method, Vec::new(), token_type()),
        ));
    }
    Err(SpecializeError::unresolvable(
        Location::component(model.attribute_full_name(attribute)),
        "attribute has no value",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Stmt, Type};
    use crate::specializer::test_support::{context_for, model_from_yaml};
    use crate::specializer::{
        AttributeSlotPass, ComponentSlotPass, CompositePass, ExpressionPass, InstanceClassPass,
        Pass, PortSlotPass,
    };
    use indoc::indoc;

    fn prepared(model: &crate::model::Model) -> Context<'_> {
        let mut ctx = context_for(model);
        InstanceClassPass.run(&mut ctx).unwrap();
        CompositePass.run(&mut ctx).unwrap();
        AttributeSlotPass.run(&mut ctx).unwrap();
        PortSlotPass.run(&mut ctx).unwrap();
        ComponentSlotPass.run(&mut ctx).unwrap();
        ExpressionPass.run(&mut ctx).unwrap();
        ctx
    }

    fn stmts<'a>(ctx: &'a Context<'_>, class: &str, method: &str) -> &'a [Stmt] {
        &ctx.scene
            .method(class, method)
            .and_then(|m| m.body.as_ref())
            .unwrap()
            .stmts
    }

    fn calls(stmts: &[Stmt], name: &str) -> usize {
        stmts
            .iter()
            .filter_map(Stmt::invoke)
            .filter(|i| i.method == name)
            .count()
    }

    #[test]
    fn test_constant_parameter_becomes_token_construction() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: source, class: Const, parameters: { value: '7' } }
              - { kind: atomic, name: sink, class: Discard }
            relations:
              - { name: r, width: 1, bufferSize: 1, links: [source.output, sink.input] }
        "});
        let mut ctx = prepared(&model);
        assert!(inline_parameters(&mut ctx).unwrap() > 0);
        let fire = stmts(&ctx, "generated.top_source", "fire");
        assert_eq!(calls(fire, "getToken"), 0);
        assert!(fire.iter().any(|s| matches!(
            s,
            Stmt::Invoke(i) if i.class == "IntToken" && i.args == vec![Operand::int(7)]
        )));
    }

    #[test]
    fn test_fsm_action_writes_token_field() {
        let model = model_from_yaml(indoc! {"
            name: top
            parameters: { gain: '1' }
            entities:
              - kind: fsm
                name: control
                initialState: a
                states: [{ name: a }, { name: b }]
                transitions:
                  - { from: a, to: b, guard: 'true', commit: [{ destination: gain, expression: 'gain * 2' }] }
        "});
        let mut ctx = prepared(&model);
        inline_parameters(&mut ctx).unwrap();
        let postfire = stmts(&ctx, "generated.top_control", "postfire");
        assert_eq!(calls(postfire, "setToken"), 0);
        let writes: Vec<&str> = postfire
            .iter()
            .filter_map(|s| match s {
                Stmt::Assign(crate::ir::Place::InstanceField(_, f), _) => Some(f.name.as_str()),
                _ => None,
            })
            .collect();
        assert!(writes.contains(&"_CGtoken_gain"), "{:?}", writes);
    }

    #[test]
    fn test_get_expression_folds_to_string() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: scale, class: Scale, parameters: { factor: '3' } }
        "});
        let mut ctx = prepared(&model);
        let text = ctx
            .scene
            .with_body("generated.top_scale", "fire", |_, body| {
                let param = body.new_local("$p", Type::object("Parameter"));
                let text = body.new_local("$s", Type::object("String"));
                body.stmts.splice(
                    0..0,
                    [
                        Stmt::assign_local(
                            &param,
                            Expr::InstanceField(
                                Operand::local("this"),
                                crate::ir::FieldRef::new("generated.top_scale", "factor"),
                            ),
                        ),
                        Stmt::assign_local(
                            &text,
                            Expr::Invoke(InvokeExpr::virtual_call(
                                Operand::local(&param),
                                "Variable",
                                "getExpression",
                                Vec::new(),
                                Type::object("String"),
                            )),
                        ),
                    ],
                );
                text
            })
            .unwrap();
        inline_parameters(&mut ctx).unwrap();
        let fire = stmts(&ctx, "generated.top_scale", "fire");
        assert_eq!(
            fire[1],
            Stmt::assign_local(text, Expr::constant(Const::Str("3".into())))
        );
    }
}
