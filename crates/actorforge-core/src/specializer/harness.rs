//! The entry point of the specialized program.

use super::{Context, Pass};
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{
    BinOp, BodyBuilder, Class, ClassKind, Cond, CondOp, Const, Expr, InvokeExpr, Method, Operand,
    Type,
};
use tracing::info;

pub const MAIN_METHOD: &str = "main";

pub struct HarnessPass;

impl Pass for HarnessPass {
    fn name(&self) -> &'static str {
        "harness"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let top = ctx.top_class().to_string();
        let main = format!("{}.Main", ctx.config.target_package);
        let cap = match ctx.config.iterations {
            Some(n) => Some(i64::try_from(n).map_err(|_| {
                SpecializeError::unsupported(Location::none(), format!("iteration cap {} is too large", n))
            })?),
            None => None,
        };
        let args: Vec<Operand> = ctx
            .scene
            .method(&top, "<init>")
            .map(|init| {
                init.params
                    .iter()
                    .map(|(_, ty)| match ty.class_name() {
                        Some("String") => Operand::str(ctx.model.component(ctx.model.top()).name.clone()),
                        _ => Operand::null(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut method = Method::new(MAIN_METHOD, Vec::new(), Type::Void, true, &main);
        if let Some(body) = method.body.as_mut() {
            let mut b = BodyBuilder::new(body);
            let model = b.new_object(&top, args);
            let lifecycle = |name: &str, ret: Type| {
                InvokeExpr::virtual_call(Operand::local(&model), &top, name, Vec::new(), ret)
            };
            b.invoke(lifecycle("preinitialize", Type::Void));
            b.invoke(lifecycle("initialize", Type::Void));

            let count = b.eval("$n", Type::Long, Expr::constant(Const::Long(0)));
            let (head, next, done) = (b.label(), b.label(), b.label());
            b.place_label(&head);
            if let Some(cap) = cap {
                b.if_goto(
                    Cond::new(CondOp::Ge, Operand::local(&count), Operand::Const(Const::Long(cap))),
                    &done,
                );
            }
            let ready = b.call("$ready", lifecycle("prefire", Type::Boolean));
            b.if_goto(
                Cond::new(CondOp::Eq, Operand::local(&ready), Operand::bool(false)),
                &next,
            );
            b.invoke(lifecycle("fire", Type::Void));
            let more = b.call("$more", lifecycle("postfire", Type::Boolean));
            b.if_goto(
                Cond::new(CondOp::Eq, Operand::local(&more), Operand::bool(false)),
                &done,
            );
            b.place_label(&next);
            b.assign(
                &count,
                Expr::Binary(BinOp::Add, Operand::local(&count), Operand::Const(Const::Long(1))),
            );
            b.goto(&head);
            b.place_label(&done);
            b.invoke(lifecycle("wrapup", Type::Void));
            b.ret(None);
            b.append();
        }

        let mut class = Class::new(&main, Some("Object"), ClassKind::Application);
        class.add_method(method)?;
        ctx.scene.add_class(class)?;
        ctx.set_main_class(main.clone());
        info!("Generated harness {} driving {}", main, top);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecializerConfig;
    use crate::ir::Stmt;
    use crate::specializer::test_support::{context_with_config, model_from_yaml};
    use crate::specializer::{CompositePass, InstanceClassPass};
    use indoc::indoc;

    const PIPE: &str = indoc! {"
        name: top
        entities:
          - { kind: atomic, name: source, class: Const, parameters: { value: '1' } }
          - { kind: atomic, name: sink, class: Discard }
        relations:
          - { name: r, width: 1, bufferSize: 1, links: [source.output, sink.input] }
    "};

    fn harness(iterations: Option<u64>) -> Vec<Stmt> {
        let model = model_from_yaml(PIPE);
        let config = SpecializerConfig {
            iterations,
            ..SpecializerConfig::default()
        };
        let mut ctx = context_with_config(&model, config);
        InstanceClassPass.run(&mut ctx).unwrap();
        CompositePass.run(&mut ctx).unwrap();
        HarnessPass.run(&mut ctx).unwrap();
        assert_eq!(ctx.main_class(), Some("generated.Main"));
        let main = ctx.scene.method("generated.Main", MAIN_METHOD).unwrap();
        assert!(main.is_static);
        main.body.clone().unwrap().stmts
    }

    fn calls(stmts: &[Stmt]) -> Vec<String> {
        stmts
            .iter()
            .filter_map(Stmt::invoke)
            .map(|i| i.method.clone())
            .collect()
    }

    #[test]
    fn test_lifecycle_order() {
        let stmts = harness(None);
        assert_eq!(
            calls(&stmts),
            vec!["<init>", "preinitialize", "initialize", "prefire", "fire", "postfire", "wrapup"]
        );
        assert!(matches!(
            &stmts[0],
            Stmt::Assign(_, Expr::New(class)) if class == "generated.top"
        ));
    }

    #[test]
    fn test_iteration_cap_is_a_literal() {
        let stmts = harness(Some(3));
        assert!(stmts.iter().any(|s| matches!(
            s,
            Stmt::If(Cond { op: CondOp::Ge, rhs: Operand::Const(Const::Long(3)), .. }, _)
        )));
        let uncapped = harness(None);
        assert!(!uncapped
            .iter()
            .any(|s| matches!(s, Stmt::If(Cond { op: CondOp::Ge, .. }, _))));
    }
}
