//! Removal of the generic object graph.
//!
//! Once every lookup is a direct field access, the only remaining uses of
//! the framework objects are names, debugging hooks, identity tests and the
//! constructors that set them up. Those fold to constants or disappear; the
//! generated classes are then cut loose from the framework hierarchy and
//! anything still typed with a framework base type is stripped.

use super::{rewrite_bodies, Context, Pass, Resolver};
use crate::errors::Result;
use crate::ir::{
    BinOp, Body, BodyBuilder, Cond, CondOp, Const, Expr, InvokeExpr, InvokeKind, Operand, Scene,
    Stmt, Type,
};
use crate::library::STRIPPED_TYPES;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

pub struct IdentityPass;

/// Calls with no effect on a specialized program.
const REMOVED_CALLS: &[&str] = &["_debug", "attachText", "setName"];

impl Pass for IdentityPass {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn applies_to(&self, config: &crate::config::SpecializerConfig) -> bool {
        config.mode == crate::config::CodegenMode::Deep
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let mut folded = 0;
        rewrite_bodies(ctx, |ctx, class, _, body| {
            let n = fold_identity(ctx, class, body)?;
            folded += n;
            Ok(n > 0)
        })?;
        let detached = detach_classes(&mut ctx.scene)?;
        let stripped = strip_framework_types(&mut ctx.scene)?;
        let dropped = drop_parameters(&mut ctx.scene)?;
        info!(
            "Folded {} identity operations, detached {} classes, stripped {} members, dropped {} parameters",
            folded, detached, stripped, dropped
        );
        Ok(folded + detached + stripped + dropped > 0)
    }
}

enum Fold {
    Value(Const),
    Remove,
    Throw(String),
    Jump(String),
}

fn fold_identity(ctx: &Context<'_>, class: &str, body: &mut Body) -> Result<usize> {
    let folds: Vec<(usize, Fold)> = {
        let resolver = Resolver::new(ctx.model, &ctx.scene, ctx.component_of_class(class), body)?;
        let mut folds = Vec::new();
        for (i, stmt) in body.stmts.iter().enumerate() {
            if let Some(fold) = fold_stmt(ctx, &resolver, i, stmt) {
                folds.push((i, fold));
            }
        }
        folds
    };

    for (index, fold) in folds.iter().rev() {
        let def = body.stmts[*index].def().map(str::to_string);
        let replacement = match fold {
            Fold::Value(value) => match def {
                Some(def) => vec![Stmt::assign_local(def, Expr::constant(value.clone()))],
                None => Vec::new(),
            },
            Fold::Remove => Vec::new(),
            Fold::Jump(target) => vec![Stmt::Goto(target.clone())],
            Fold::Throw(message) => {
                let mut b = BodyBuilder::new(body);
                b.throw_error(message);
                b.finish()
            }
        };
        body.splice(*index, replacement);
    }
    Ok(folds.len())
}

fn fold_stmt(ctx: &Context<'_>, resolver: &Resolver<'_>, i: usize, stmt: &Stmt) -> Option<Fold> {
    let model = ctx.model;
    match stmt {
        Stmt::Assign(_, Expr::InstanceField(_, field)) if field.name == "_debugging" => {
            return Some(Fold::Value(Const::Bool(false)));
        }
        Stmt::Assign(_, Expr::Binary(BinOp::Cmp(op @ (CondOp::Eq | CondOp::Ne)), a, b)) => {
            let same = same_object(resolver, a, b, i)?;
            return Some(Fold::Value(Const::Bool(op.test(same, true))));
        }
        Stmt::If(Cond { op: op @ (CondOp::Eq | CondOp::Ne), lhs, rhs }, target) => {
            let same = same_object(resolver, lhs, rhs, i)?;
            return Some(if op.test(same, true) {
                Fold::Jump(target.clone())
            } else {
                Fold::Remove
            });
        }
        _ => {}
    }

    let invoke = stmt.invoke()?;
    match invoke.method.as_str() {
        "getName" | "getFullName" => {
            let target = resolver.resolve(invoke.base.as_ref()?, i)?;
            let name = if invoke.method == "getName" {
                target.name(model).to_string()
            } else {
                target.full_name(model)
            };
            Some(Fold::Value(Const::Str(name)))
        }
        "handleModelError" => {
            let location = invoke
                .base
                .as_ref()
                .and_then(|b| resolver.resolve(b, i))
                .map(|t| t.full_name(model))
                .unwrap_or_default();
            Some(Fold::Throw(format!("model error in {}", location)))
        }
        name if REMOVED_CALLS.contains(&name) && stmt.def().is_none() => Some(Fold::Remove),
        _ => None,
    }
}

/// Whether two operands are known to hold the same model object. Comparing
/// a known object with null is known to fail.
fn same_object(resolver: &Resolver<'_>, a: &Operand, b: &Operand, at: usize) -> Option<bool> {
    let known = |o: &Operand| resolver.resolve(o, at);
    match (known(a), known(b)) {
        (Some(x), Some(y)) => Some(x == y),
        (Some(_), None) if b.as_const() == Some(&Const::Null) => Some(false),
        (None, Some(_)) if a.as_const() == Some(&Const::Null) => Some(false),
        _ => None,
    }
}

/// Re-parent generated classes on `Object`. Constructors stop calling the
/// framework constructors.
fn detach_classes(scene: &mut Scene) -> Result<usize> {
    let mut detached = 0;
    for class in scene.application_classes() {
        let Some(superclass) = scene.class(&class).and_then(|c| c.superclass.clone()) else {
            continue;
        };
        let framework = scene
            .class(&superclass)
            .map(|c| !c.is_application())
            .unwrap_or(false);
        if superclass == "Object" || !framework {
            continue;
        }
        scene.set_superclass(&class, Some("Object"))?;
        if let Some(c) = scene.class_mut(&class) {
            c.interfaces.clear();
        }
        if scene.method(&class, "<init>").and_then(|m| m.body.as_ref()).is_some() {
            scene.with_body(&class, "<init>", |scene, body| {
                for stmt in &mut body.stmts {
                    if let Stmt::Invoke(invoke) = stmt {
                        let framework_init = invoke.kind == InvokeKind::Special
                            && invoke.method == "<init>"
                            && invoke.base_local() == Some("this")
                            && scene.class(&invoke.class).map(|c| !c.is_application()).unwrap_or(false);
                        if framework_init {
                            *invoke = InvokeExpr::special(
                                Operand::local("this"),
                                "Object",
                                "<init>",
                                Vec::new(),
                            );
                        }
                    }
                }
            })?;
        }
        debug!("Detached {} from {}", class, superclass);
        detached += 1;
    }
    Ok(detached)
}

fn is_stripped(scene: &Scene, ty: &Type) -> bool {
    match ty {
        Type::Ref(class) => STRIPPED_TYPES.iter().any(|s| scene.is_subtype(class, s)),
        Type::Array(element) => is_stripped(scene, element),
        _ => false,
    }
}

fn is_stripped_class(scene: &Scene, class: &str) -> bool {
    STRIPPED_TYPES.iter().any(|s| scene.is_subtype(class, s))
}

fn touches_stripped(scene: &Scene, body: &Body, stmt: &Stmt) -> bool {
    let local_stripped = |name: &str| body.local_type(name).map(|t| is_stripped(scene, t)).unwrap_or(false);
    if stmt.uses().into_iter().any(local_stripped) || stmt.def().map(local_stripped).unwrap_or(false) {
        return true;
    }
    let field_stripped = stmt.fields().into_iter().any(|f| {
        is_stripped_class(scene, &f.class)
            || scene
                .resolve_field(&f.class, &f.name)
                .map(|(_, field)| is_stripped(scene, &field.ty))
                .unwrap_or(false)
    });
    if field_stripped {
        return true;
    }
    let expr = match stmt {
        Stmt::Assign(_, expr) => Some(expr),
        _ => None,
    };
    let expr_stripped = match expr {
        Some(Expr::New(class)) => is_stripped_class(scene, class),
        Some(Expr::Cast(ty, _) | Expr::InstanceOf(_, ty) | Expr::NewArray(ty, _)) => {
            is_stripped(scene, ty)
        }
        _ => false,
    };
    expr_stripped
        || stmt
            .invoke()
            .map(|i| is_stripped_class(scene, &i.class) || is_stripped(scene, &i.ret))
            .unwrap_or(false)
}

fn default_value(ty: &Type) -> Const {
    match ty {
        Type::Boolean => Const::Bool(false),
        Type::Int => Const::Int(0),
        Type::Long => Const::Long(0),
        Type::Double => Const::Double(0.0),
        _ => Const::Null,
    }
}

/// Remove fields, locals and statements typed with a framework base type.
/// A removed definition of a surviving local becomes a default value.
fn strip_framework_types(scene: &mut Scene) -> Result<usize> {
    let mut stripped = 0;
    for class in scene.application_classes() {
        let fields: Vec<String> = scene
            .class(&class)
            .map(|c| {
                c.fields
                    .values()
                    .filter(|f| is_stripped(scene, &f.ty))
                    .map(|f| f.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        let methods: Vec<String> = scene
            .class(&class)
            .map(|c| {
                c.methods
                    .values()
                    .filter(|m| m.body.is_some())
                    .map(|m| m.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        for method in methods {
            stripped += scene.with_body(&class, &method, |scene, body| {
                let mut removed = 0;
                let mut stmts = Vec::with_capacity(body.stmts.len());
                for stmt in std::mem::take(&mut body.stmts) {
                    if !touches_stripped(scene, body, &stmt) {
                        stmts.push(stmt);
                        continue;
                    }
                    removed += 1;
                    if let Some(def) = stmt.def() {
                        if let Some(ty) = body.local_type(def).filter(|t| !is_stripped(scene, t)) {
                            stmts.push(Stmt::assign_local(def, Expr::constant(default_value(ty))));
                        }
                    }
                }
                body.stmts = stmts;
                let before = body.locals.len();
                body.locals.retain(|_, ty| !is_stripped(scene, ty));
                removed + before - body.locals.len()
            })?;
        }

        if let Some(c) = scene.class_mut(&class) {
            for field in &fields {
                c.fields.shift_remove(field);
                stripped += 1;
            }
        }
        if !fields.is_empty() {
            debug!("{}: stripped fields {}", class, fields.join(", "));
        }
    }
    Ok(stripped)
}

/// Drop parameters typed with a framework base type, and constructor
/// parameters nothing reads any more, at declarations and call sites.
fn drop_parameters(scene: &mut Scene) -> Result<usize> {
    let mut dropped: FxHashMap<(String, String), Vec<usize>> = FxHashMap::default();
    for class in scene.application_classes() {
        let Some(c) = scene.class(&class) else {
            continue;
        };
        for method in c.methods.values() {
            let Some(body) = method.body.as_ref() else {
                continue;
            };
            let unused: Vec<usize> = method
                .params
                .iter()
                .enumerate()
                .filter(|(_, (name, ty))| {
                    let read = body.stmts.iter().any(|s| s.uses().contains(&name.as_str()));
                    is_stripped(scene, ty) || !body.locals.contains_key(name) || (method.is_constructor() && !read)
                })
                .map(|(i, _)| i)
                .collect();
            if !unused.is_empty() {
                dropped.insert((class.clone(), method.name.clone()), unused);
            }
        }
    }

    let mut count = 0;
    for ((class, method), indices) in &dropped {
        if let Some(m) = scene.method_mut(class, method) {
            let mut i = 0;
            m.params.retain(|_| {
                let keep = !indices.contains(&i);
                i += 1;
                keep
            });
            count += indices.len();
        }
    }

    if dropped.is_empty() {
        return Ok(0);
    }
    for (class, method) in scene.application_methods() {
        scene.with_body(&class, &method, |scene, body| {
            for stmt in &mut body.stmts {
                let Some(invoke) = stmt.invoke_mut() else {
                    continue;
                };
                let owner = scene
                    .resolve_method(&invoke.class, &invoke.method)
                    .map(|(owner, _)| owner.name.clone())
                    .unwrap_or_else(|| invoke.class.clone());
                let Some(indices) = dropped.get(&(owner, invoke.method.clone())) else {
                    continue;
                };
                let mut i = 0;
                invoke.args.retain(|_| {
                    let keep = !indices.contains(&i);
                    i += 1;
                    keep
                });
            }
        })?;
    }
    Ok(count)
}

/// Framework-typed members still present in generated classes. Empty once
/// the pipeline has run in deep mode.
pub fn residual_framework_references(scene: &Scene) -> Vec<String> {
    let mut found = Vec::new();
    for class in scene.classes().filter(|c| c.is_application()) {
        if let Some(superclass) = &class.superclass {
            if is_stripped_class(scene, superclass) {
                found.push(format!("{} extends {}", class.name, superclass));
            }
        }
        for field in class.fields.values() {
            if is_stripped(scene, &field.ty) {
                found.push(format!("field {}.{}: {}", class.name, field.name, field.ty));
            }
        }
        for method in class.methods.values() {
            for (param, ty) in &method.params {
                if is_stripped(scene, ty) {
                    found.push(format!("parameter {}.{}({}): {}", class.name, method.name, param, ty));
                }
            }
            let Some(body) = method.body.as_ref() else {
                continue;
            };
            for (local, ty) in &body.locals {
                if is_stripped(scene, ty) {
                    found.push(format!("local {}.{}/{}: {}", class.name, method.name, local, ty));
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specializer::test_support::{context_for, model_from_yaml};
    use crate::specializer::{
        AttributeSlotPass, CallInlinePass, ComponentSlotPass, CompositePass, ConnectivityPass,
        ExpressionPass, InstanceClassPass, PortSlotPass, TokenTypePass,
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

    fn prepared(model: &crate::model::Model, inline: bool) -> Context<'_> {
        let mut ctx = context_for(model);
        InstanceClassPass.run(&mut ctx).unwrap();
        CompositePass.run(&mut ctx).unwrap();
        AttributeSlotPass.run(&mut ctx).unwrap();
        PortSlotPass.run(&mut ctx).unwrap();
        ComponentSlotPass.run(&mut ctx).unwrap();
        ExpressionPass.run(&mut ctx).unwrap();
        TokenTypePass.run(&mut ctx).unwrap();
        ConnectivityPass.run(&mut ctx).unwrap();
        if inline {
            CallInlinePass.run(&mut ctx).unwrap();
        }
        ctx
    }

    fn body<'a>(ctx: &'a Context<'_>, class: &str, method: &str) -> &'a Body {
        ctx.scene
            .method(class, method)
            .and_then(|m| m.body.as_ref())
            .unwrap()
    }

    #[test]
    fn test_names_fold_to_constants() {
        let model = model_from_yaml(PIPE);
        let mut ctx = prepared(&model, false);
        IdentityPass.run(&mut ctx).unwrap();
        let init = body(&ctx, "generated.top_sink", "initialize");
        assert!(!init
            .stmts
            .iter()
            .filter_map(Stmt::invoke)
            .any(|i| i.method == "getFullName"));
        assert!(init.stmts.iter().any(|s| matches!(
            s,
            Stmt::Assign(_, Expr::Use(Operand::Const(Const::Str(name)))) if name == ".top.sink"
        )));
    }

    #[test]
    fn test_debugging_hooks_disappear() {
        let model = model_from_yaml(PIPE);
        let mut ctx = prepared(&model, true);
        IdentityPass.run(&mut ctx).unwrap();
        for (class, method) in ctx.scene.application_methods() {
            let Some(body) = ctx.scene.method(&class, &method).and_then(|m| m.body.as_ref()) else {
                continue;
            };
            for stmt in &body.stmts {
                if let Some(invoke) = stmt.invoke() {
                    assert!(
                        !REMOVED_CALLS.contains(&invoke.method.as_str()),
                        "{}.{}: {:?}",
                        class,
                        method,
                        stmt
                    );
                }
                assert!(
                    !stmt.fields().iter().any(|f| f.name == "_debugging"),
                    "{}.{}: {:?}",
                    class,
                    method,
                    stmt
                );
            }
        }
    }

    #[test]
    fn test_generated_classes_leave_the_framework() {
        let model = model_from_yaml(PIPE);
        let mut ctx = prepared(&model, true);
        assert!(!residual_framework_references(&ctx.scene).is_empty());
        IdentityPass.run(&mut ctx).unwrap();

        let residual = residual_framework_references(&ctx.scene);
        assert!(residual.is_empty(), "{:#?}", residual);
        for class in ctx.scene.application_classes() {
            let c = ctx.scene.class(&class).unwrap();
            assert_eq!(c.superclass.as_deref(), Some("Object"), "{}", class);
            assert!(c.interfaces.is_empty());
        }
    }

    #[test]
    fn test_constructors_call_object_init_only() {
        let model = model_from_yaml(PIPE);
        let mut ctx = prepared(&model, true);
        IdentityPass.run(&mut ctx).unwrap();
        let init = ctx.scene.method("generated.top_sink", "<init>").unwrap();
        assert!(init.params.is_empty(), "{:?}", init.params);
        let supers: Vec<&InvokeExpr> = init
            .body
            .as_ref()
            .unwrap()
            .stmts
            .iter()
            .filter_map(Stmt::invoke)
            .filter(|i| i.method == "<init>")
            .collect();
        assert_eq!(supers.len(), 1);
        assert_eq!(supers[0].class, "Object");
        assert!(supers[0].args.is_empty());
    }

    #[test]
    fn test_stripped_definition_becomes_default() {
        let mut scene = crate::library::library_scene().unwrap();
        let mut class = crate::ir::Class::new("App", Some("Object"), crate::ir::ClassKind::Application);
        let mut method = crate::ir::Method::new("run", Vec::new(), Type::Int, false, "App");
        {
            let body = method.body.as_mut().unwrap();
            body.declare("p", Type::object("IOPort"));
            body.declare("w", Type::Int);
            body.stmts.push(Stmt::assign_local(
                "w",
                Expr::Invoke(InvokeExpr::virtual_call(
                    Operand::local("p"),
                    "IOPort",
                    "getWidth",
                    Vec::new(),
                    Type::Int,
                )),
            ));
            body.stmts.push(Stmt::Return(Some(Operand::local("w"))));
        }
        class.add_method(method).unwrap();
        scene.add_class(class).unwrap();

        strip_framework_types(&mut scene).unwrap();
        let body = scene.method("App", "run").unwrap().body.as_ref().unwrap();
        assert!(!body.locals.contains_key("p"));
        assert_eq!(
            body.stmts[0],
            Stmt::assign_local("w", Expr::constant(Const::Int(0)))
        );
    }
}
