//! Slot materialization.
//!
//! Generated code still looks model objects up by name through the generic
//! accessors. Once every component, port and attribute owns a field, each
//! accessor call with a statically known result becomes a direct read of
//! that field. An accessor whose result cannot be determined stops the run.

mod attributes;
mod components;
mod ports;

pub use attributes::AttributeSlotPass;
pub use components::ComponentSlotPass;
pub use ports::PortSlotPass;

use super::{rewrite_bodies, Context, ModelRef, Resolver};
use crate::config::CodegenMode;
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{Body, BodyBuilder, Expr, FieldRef, InvokeExpr, Type, ValueTag};
use crate::model::{ComponentId, RelationId};
use tracing::debug;

/// Replace every call to one of `methods` in application code. Returns the
/// number of calls replaced.
pub(super) fn materialize(ctx: &mut Context<'_>, methods: &[&str]) -> Result<usize> {
    let mut replaced = 0;
    rewrite_bodies(ctx, |ctx, class, method, body| {
        let n = materialize_body(ctx, class, method, body, methods)?;
        replaced += n;
        Ok(n > 0)
    })?;
    Ok(replaced)
}

struct Site {
    index: usize,
    def: Option<String>,
    target: ModelRef,
}

fn materialize_body(
    ctx: &Context<'_>,
    class: &str,
    method: &str,
    body: &mut Body,
    methods: &[&str],
) -> Result<usize> {
    let this_component = ctx.component_of_class(class);
    let sites = {
        let resolver = Resolver::new(ctx.model, &ctx.scene, this_component, body)?;
        let mut sites = Vec::new();
        for (index, stmt) in body.stmts.iter().enumerate() {
            let Some(invoke) = stmt.invoke() else {
                continue;
            };
            if invoke.base.is_none() || !methods.contains(&invoke.method.as_str()) {
                continue;
            }
            let target = resolver.resolve_accessor(invoke, index).ok_or_else(|| {
                unresolved(&resolver, invoke, index, Location::method(class, method).at(index))
            })?;
            sites.push(Site {
                index,
                def: stmt.def().map(str::to_string),
                target,
            });
        }
        sites
    };

    for site in sites.iter().rev() {
        let mut b = BodyBuilder::new(body);
        if let Some(def) = &site.def {
            let value = slot_read(ctx, &mut b, this_component, site.target)?;
            b.assign(def, value);
        }
        let stmts = b.finish();
        body.splice(site.index, stmts);
        debug!(
            "{}.{}: accessor resolved to {}",
            class,
            method,
            site.target.full_name(ctx.model)
        );
    }
    Ok(sites.len())
}

/// Say which part of an accessor call defeated resolution.
fn unresolved(
    resolver: &Resolver<'_>,
    invoke: &InvokeExpr,
    at: usize,
    location: Location,
) -> SpecializeError {
    let receiver = invoke
        .base
        .as_ref()
        .and_then(|base| resolver.resolve(base, at));
    let Some(receiver) = receiver else {
        return SpecializeError::unresolvable(
            location,
            format!("receiver of `{}` does not denote a model object", invoke.method),
        );
    };
    if invoke.method == "getContainer" {
        return SpecializeError::unresolvable(
            location,
            format!("`{}` has no container", receiver.full_name(resolver.model())),
        );
    }
    match invoke.args.first().and_then(|a| resolver.constant_string(a, at)) {
        None => SpecializeError::unresolvable(
            location,
            format!("argument of `{}` is not a constant string", invoke.method),
        ),
        Some(name) => SpecializeError::unresolvable(
            location,
            format!(
                "`{}(\"{}\")` finds nothing in `{}`",
                invoke.method,
                name,
                receiver.full_name(resolver.model())
            ),
        ),
    }
}

/// Code reading the field that holds `target`, as seen from `from`.
fn slot_read(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    from: Option<ComponentId>,
    target: ModelRef,
) -> Result<Expr> {
    let model = ctx.model;
    let location = Location::component(target.full_name(model));
    match target {
        ModelRef::Component(component) => {
            Ok(Expr::Use(ctx.emit_component_ref(b, from, component)?))
        }
        ModelRef::Attribute(attribute) => {
            let field = ctx.attribute_field(attribute).cloned().ok_or_else(|| {
                SpecializeError::unresolvable(location, "attribute has no field")
            })?;
            let owner = model.attribute_component(attribute);
            let base = ctx.emit_component_ref(b, from, owner)?;
            Ok(Expr::InstanceField(base, field))
        }
        ModelRef::Port(port) => {
            let field = ctx
                .port_field(port)
                .cloned()
                .ok_or_else(|| SpecializeError::unresolvable(location, "port has no field"))?;
            let base = ctx.emit_component_ref(b, from, model.port(port).owner)?;
            Ok(Expr::InstanceField(base, field))
        }
        ModelRef::Relation(relation) => {
            if ctx.config.mode == CodegenMode::Deep {
                return Err(SpecializeError::unsupported(
                    location,
                    "relations are not objects in deep code",
                ));
            }
            let container = model.relation(relation).container;
            let field = relation_field(ctx, container, relation).ok_or_else(|| {
                SpecializeError::unresolvable(location, "relation has no field")
            })?;
            let base = ctx.emit_component_ref(b, from, container)?;
            Ok(Expr::InstanceField(base, field))
        }
    }
}

fn relation_field(ctx: &Context<'_>, container: ComponentId, relation: RelationId) -> Option<FieldRef> {
    let class = ctx.scene.class(ctx.class_of(container))?;
    class
        .fields
        .values()
        .find(|f| f.value_tag() == Some(&ValueTag::Relation(relation)))
        .map(|f| FieldRef::new(class.name.clone(), f.name.clone()))
}

/// IR type of the object `target` denotes, for retyping locals that hold it.
pub(super) fn object_type(ctx: &Context<'_>, target: ModelRef) -> Option<Type> {
    match target {
        ModelRef::Component(c) => Some(Type::object(ctx.class_of(c))),
        _ => None,
    }
}

#[cfg(test)]
pub(super) mod test_support {
    use crate::ir::{Body, Stmt};
    use crate::specializer::{CompositePass, Context, InstanceClassPass, Pass};

    /// Instance and composite classes, ready for slot materialization.
    pub fn prepare(ctx: &mut Context<'_>) {
        InstanceClassPass.run(ctx).unwrap();
        CompositePass.run(ctx).unwrap();
    }

    pub fn body<'a>(ctx: &'a Context<'_>, class: &str, method: &str) -> &'a Body {
        ctx.scene
            .method(class, method)
            .and_then(|m| m.body.as_ref())
            .unwrap()
    }

    pub fn calls<'a>(body: &'a Body, method: &str) -> Vec<&'a Stmt> {
        body.stmts
            .iter()
            .filter(|s| s.invoke().map(|i| i.method == method).unwrap_or(false))
            .collect()
    }
}
