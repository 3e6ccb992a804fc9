//! Classes for composite components.
//!
//! A composite class holds one field per child and drives the children
//! through the lifecycle, firing them in schedule order. In deep mode the
//! top class also owns every relation buffer and port index as static
//! arrays; in shallow mode each composite keeps live relation objects and
//! links the ports to them.

use super::instance_class::{container_params, emit_member_init, layout_members};
use super::schedule::schedule;
use super::{BufferKey, Context, Pass};
use crate::config::CodegenMode;
use crate::data::ValueType;
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{
    BodyBuilder, Class, ClassKind, Cond, CondOp, Expr, Field, FieldRef, InvokeExpr, Method,
    Operand, Type, ValueTag,
};
use crate::library::tokens::token_type;
use crate::model::{naming, ComponentId, PortId, RelationId};
use indexmap::IndexSet;
use tracing::{debug, info, warn};

pub const INSTANCE_FIELD: &str = "_CGinstance";
const POSTFIRE_RETURNS: &str = "_CGpostfireReturns";

pub struct CompositePass;

impl Pass for CompositePass {
    fn name(&self) -> &'static str {
        "composites"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        check_boundary_ports(ctx)?;
        let mut created = 0;
        for id in ctx.model.post_order() {
            if ctx.model.is_composite(id) {
                build_composite_class(ctx, id)?;
                created += 1;
            }
        }
        info!(
            "Generated {} composite classes, {} buffers",
            created,
            ctx.buffer_count()
        );
        Ok(created > 0)
    }
}

/// A composite port forwards one relation to one relation of the same
/// width. Ports with nothing on one side are left alone.
fn check_boundary_ports(ctx: &Context<'_>) -> Result<()> {
    let model = ctx.model;
    for (id, component) in model.components() {
        if !model.is_composite(id) {
            continue;
        }
        for port_id in &component.ports {
            let port = model.port(*port_id);
            if port.links.is_empty() || port.inside_links.is_empty() {
                continue;
            }
            let same_width = model.port_width(*port_id) == model.inside_width(*port_id);
            if port.links.len() != 1 || port.inside_links.len() != 1 || !same_width {
                return Err(SpecializeError::unsupported(
                    Location::component(model.port_full_name(*port_id)),
                    "composite port must join exactly one inside and one outside relation of equal width",
                ));
            }
        }
    }
    Ok(())
}

fn this() -> Operand {
    Operand::local("this")
}

fn build_composite_class(ctx: &mut Context<'_>, id: ComponentId) -> Result<()> {
    let model = ctx.model;
    let name = ctx.class_of(id).to_string();
    let is_top = id == model.top();
    let mut class = Class::new(&name, Some("TypedCompositeActor"), ClassKind::Application);

    for child in model.children(id) {
        let field_name = naming::sanitize(&model.component(*child).name);
        let field = class.add_field(Field::new(&field_name, Type::object(ctx.class_of(*child))))?;
        field.set_value_tag(ValueTag::Component(*child))?;
        ctx.register_component_field(*child, FieldRef::new(name.clone(), field_name))?;
    }
    if is_top {
        let field = class.add_field(Field::new_static(INSTANCE_FIELD, Type::object(&name)))?;
        field.set_value_tag(ValueTag::Component(id))?;
        ctx.register_component_field(id, FieldRef::new(name.clone(), INSTANCE_FIELD))?;
    }
    class.add_field(Field::new(POSTFIRE_RETURNS, Type::Boolean))?;
    layout_members(ctx, id, &mut class)?;

    let shallow_relations = match ctx.config.mode {
        CodegenMode::Shallow => layout_relations(ctx, id, &mut class)?,
        CodegenMode::Deep => Vec::new(),
    };
    let buffers = match (ctx.config.mode, is_top) {
        (CodegenMode::Deep, true) => layout_buffers(ctx, &mut class)?,
        _ => Vec::new(),
    };

    let mut init = Method::new("<init>", container_params(), Type::Void, false, &name);
    if let Some(body) = init.body.as_mut() {
        let mut b = BodyBuilder::new(body);
        b.invoke(InvokeExpr::special(
            this(),
            "TypedCompositeActor",
            "<init>",
            vec![Operand::local("container"), Operand::local("name")],
        ));
        if is_top {
            b.set_static(FieldRef::new(name.clone(), INSTANCE_FIELD), this());
        }
        for (field, element, length) in &buffers {
            let array = b.eval(
                "$b",
                Type::array_of(element.clone()),
                Expr::NewArray(element.clone(), Operand::int(*length)),
            );
            b.set_static(field.clone(), Operand::local(array));
        }
        emit_member_init(ctx, &mut b, id)?;
        for child in model.children(id) {
            let child_class = ctx.class_of(*child).to_string();
            let object = b.eval("$r", Type::object(&child_class), Expr::New(child_class.clone()));
            b.invoke(InvokeExpr::special(
                Operand::local(&object),
                child_class,
                "<init>",
                vec![this(), Operand::str(model.component(*child).name.clone())],
            ));
            let field = ctx.component_field(*child).cloned().ok_or_else(|| {
                SpecializeError::invariant(ctx.location(*child), "child field not registered")
            })?;
            b.set_field(this(), field, Operand::local(object));
        }
        emit_relations(ctx, &mut b, id, &shallow_relations)?;
        b.ret(None);
        b.append();
    }
    class.add_method(init)?;

    for method in ["preinitialize", "initialize", "wrapup"] {
        class.add_method(broadcast_method(ctx, id, &name, method)?)?;
    }
    let mut prefire = Method::new("prefire", Vec::new(), Type::Boolean, false, &name);
    if let Some(body) = prefire.body.as_mut() {
        let mut b = BodyBuilder::new(body);
        b.ret(Some(Operand::bool(true)));
        b.append();
    }
    class.add_method(prefire)?;
    class.add_method(fire_method(ctx, id, &name)?)?;
    let mut postfire = Method::new("postfire", Vec::new(), Type::Boolean, false, &name);
    if let Some(body) = postfire.body.as_mut() {
        let mut b = BodyBuilder::new(body);
        let result = b.get_field(this(), FieldRef::new(name.clone(), POSTFIRE_RETURNS), Type::Boolean);
        b.ret(Some(Operand::local(result)));
        b.append();
    }
    class.add_method(postfire)?;

    debug!("{}: {} children", name, model.children(id).len());
    ctx.scene.add_class(class)?;
    Ok(())
}

fn child_ref(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    child: ComponentId,
) -> Result<(String, String)> {
    let field = ctx.component_field(child).cloned().ok_or_else(|| {
        SpecializeError::invariant(ctx.location(child), "child field not registered")
    })?;
    let class = ctx.class_of(child).to_string();
    let local = b.get_field(this(), field, Type::object(&class));
    Ok((local, class))
}

fn call(local: &str, class: &str, method: &str, ret: Type) -> InvokeExpr {
    InvokeExpr::virtual_call(Operand::local(local), class, method, Vec::new(), ret)
}

/// `method` called on every child in declaration order.
fn broadcast_method(
    ctx: &Context<'_>,
    id: ComponentId,
    class: &str,
    method: &str,
) -> Result<Method> {
    let mut result = Method::new(method, Vec::new(), Type::Void, false, class);
    if let Some(body) = result.body.as_mut() {
        let mut b = BodyBuilder::new(body);
        for child in ctx.model.children(id) {
            let (local, child_class) = child_ref(ctx, &mut b, *child)?;
            b.invoke(call(&local, &child_class, method, Type::Void));
        }
        b.ret(None);
        b.append();
    }
    Ok(result)
}

fn fire_method(ctx: &Context<'_>, id: ComponentId, class: &str) -> Result<Method> {
    let order = schedule(ctx.model, id)?;
    let returns = FieldRef::new(class, POSTFIRE_RETURNS);
    let mut fire = Method::new("fire", Vec::new(), Type::Void, false, class);
    if let Some(body) = fire.body.as_mut() {
        let mut b = BodyBuilder::new(body);
        b.set_field(this(), returns.clone(), Operand::bool(true));
        for child in order {
            let (local, child_class) = child_ref(ctx, &mut b, child)?;
            let next = b.label();
            let ready = b.call("$p", call(&local, &child_class, "prefire", Type::Boolean));
            b.if_goto(
                Cond::new(CondOp::Eq, Operand::local(ready), Operand::bool(false)),
                &next,
            );
            b.invoke(call(&local, &child_class, "fire", Type::Void));
            let again = b.call("$q", call(&local, &child_class, "postfire", Type::Boolean));
            b.if_goto(
                Cond::new(CondOp::Ne, Operand::local(again), Operand::bool(false)),
                &next,
            );
            b.set_field(this(), returns.clone(), Operand::bool(false));
            b.place_label(&next);
        }
        b.ret(None);
        b.append();
    }
    Ok(fire)
}

/// Static buffer and index fields on the top class, returned with their
/// element type and length for allocation in the constructor.
fn layout_buffers(ctx: &mut Context<'_>, class: &mut Class) -> Result<Vec<(FieldRef, Type, i32)>> {
    let model = ctx.model;
    let mut allocations = Vec::new();
    let mut nets: IndexSet<RelationId> = IndexSet::new();
    for (relation, _) in model.relations() {
        nets.insert(ctx.net_key(relation));
    }
    let mut indexed_ports: IndexSet<PortId> = IndexSet::new();

    for key in nets {
        let net = model.net_of(key);
        let width = model.relation(key).width;
        let location = Location::component(model.relation_full_name(key));
        let destinations: Vec<PortId> = net
            .ports
            .iter()
            .copied()
            .filter(|p| model.port(*p).input)
            .collect();
        if width == 0 {
            warn!("{} has width zero and carries no tokens", model.relation_full_name(key));
            continue;
        }
        if destinations.is_empty() {
            continue;
        }
        let size = buffer_size(ctx, &net.relations).ok_or_else(|| {
            SpecializeError::unresolvable(location.clone(), "relation has no constant bufferSize")
        })?;
        if size == 0 {
            return Err(SpecializeError::unsupported(location, "bufferSize must be positive"));
        }
        ctx.set_buffer_size(key, size);

        let types: IndexSet<ValueType> = destinations
            .iter()
            .map(|p| model.port(*p).value_type.clone())
            .collect();
        let base = naming::sanitize(model.relation_full_name(key).trim_start_matches('.'));
        for channel in 0..width {
            for value_type in &types {
                let name = format!(
                    "_CGbuffer_{}_{}_{}",
                    base,
                    channel,
                    naming::sanitize(&value_type.to_string())
                );
                let field = class.add_field(Field::new_static(&name, Type::array_of(token_type())))?;
                field.set_value_tag(ValueTag::Buffer {
                    relation: key,
                    channel,
                    value_type: value_type.clone(),
                })?;
                field.set_type_tag(value_type.clone())?;
                let field_ref = FieldRef::new(class.name.clone(), name);
                ctx.register_buffer(
                    BufferKey {
                        net: key,
                        channel,
                        value_type: value_type.clone(),
                    },
                    field_ref.clone(),
                );
                allocations.push((field_ref, token_type(), to_i32(size, &location)?));
            }
        }
        if size > 1 {
            indexed_ports.extend(net.ports.iter().copied());
        }
    }

    for port in indexed_ports {
        let name = format!(
            "_CGindex_{}",
            naming::sanitize(model.port_full_name(port).trim_start_matches('.'))
        );
        if class.fields.contains_key(&name) {
            continue;
        }
        let location = Location::component(model.port_full_name(port));
        let field = class.add_field(Field::new_static(&name, Type::array_of(Type::Int)))?;
        field.set_value_tag(ValueTag::PortIndex(port))?;
        let field_ref = FieldRef::new(class.name.clone(), name);
        ctx.register_index_field(port, field_ref.clone());
        allocations.push((field_ref, Type::Int, to_i32(model.port_width(port), &location)?));
    }
    Ok(allocations)
}

fn to_i32(value: usize, location: &Location) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| SpecializeError::unsupported(location.clone(), "array length out of range"))
}

/// Constant `bufferSize` parameter of any relation on a net.
fn buffer_size(ctx: &Context<'_>, relations: &[RelationId]) -> Option<usize> {
    relations.iter().find_map(|relation| {
        let attribute = ctx.model.relation_attribute(*relation, "bufferSize")?;
        if !ctx.constants.is_constant(attribute) {
            return None;
        }
        let value = ctx.model.attribute(attribute).value.as_ref()?;
        usize::try_from(value.int_value().ok()?).ok()
    })
}

/// Relation fields for shallow mode.
fn layout_relations(
    ctx: &Context<'_>,
    id: ComponentId,
    class: &mut Class,
) -> Result<Vec<(RelationId, FieldRef)>> {
    let mut fields = Vec::new();
    for relation in ctx.model.contained_relations(id) {
        let name = format!(
            "_CGrelation_{}",
            naming::sanitize(&ctx.model.relation(*relation).name)
        );
        let field = class.add_field(Field::new(&name, Type::object("TypedIORelation")))?;
        field.set_value_tag(ValueTag::Relation(*relation))?;
        fields.push((*relation, FieldRef::new(class.name.clone(), name)));
    }
    Ok(fields)
}

/// Create the relations and link ports to them.
fn emit_relations(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    id: ComponentId,
    relations: &[(RelationId, FieldRef)],
) -> Result<()> {
    let model = ctx.model;
    for (relation, field) in relations {
        let data = model.relation(*relation);
        let object = b.new_object(
            "TypedIORelation",
            vec![this(), Operand::str(data.name.clone())],
        );
        let width = to_i32(data.width, &Location::component(model.relation_full_name(*relation)))?;
        b.invoke(InvokeExpr::virtual_call(
            Operand::local(&object),
            "IORelation",
            "setWidth",
            vec![Operand::int(width)],
            Type::Void,
        ));
        b.set_field(this(), field.clone(), Operand::local(&object));
        for port in &data.ports {
            let port_field = ctx.port_field(*port).cloned().ok_or_else(|| {
                SpecializeError::invariant(
                    Location::component(model.port_full_name(*port)),
                    "port has no field",
                )
            })?;
            let owner = model.port(*port).owner;
            let holder = if owner == id {
                this()
            } else {
                let (local, _) = child_ref(ctx, b, owner)?;
                Operand::local(local)
            };
            let port_object = b.get_field(holder, port_field, Type::object("TypedIOPort"));
            b.invoke(InvokeExpr::virtual_call(
                Operand::local(port_object),
                "Port",
                "link",
                vec![Operand::local(&object)],
                Type::Void,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecializerConfig;
    use crate::ir::{Cfg, Stmt};
    use crate::specializer::instance_class::InstanceClassPass;
    use crate::specializer::test_support::{context_with_config, model_from_yaml};
    use indoc::indoc;

    const PIPELINE: &str = indoc! {"
        name: top
        entities:
          - { kind: atomic, name: source, class: Const, parameters: { value: '3' } }
          - kind: composite
            name: inner
            ports:
              - { name: in, direction: input }
            entities:
              - { kind: atomic, name: sink, class: Recorder }
            connections:
              - { from: in, to: sink.input }
        relations:
          - { name: wire, width: 1, bufferSize: 2, links: [source.output, inner.in] }
    "};

    fn top_fields(mode: CodegenMode) -> Vec<String> {
        let model = model_from_yaml(PIPELINE);
        let config = SpecializerConfig {
            mode,
            ..SpecializerConfig::default()
        };
        let mut ctx = context_with_config(&model, config);
        InstanceClassPass.run(&mut ctx).unwrap();
        CompositePass.run(&mut ctx).unwrap();
        let classes = ctx.scene.application_classes();
        for class in &classes {
            for method in ctx.scene.class(class).unwrap().methods.values() {
                Cfg::build(method.body.as_ref().unwrap()).unwrap();
            }
        }
        let top = ctx.scene.class("generated.top").unwrap();
        top.fields.keys().cloned().collect()
    }

    #[test]
    fn test_deep_mode_allocates_buffers_on_top() {
        let fields = top_fields(CodegenMode::Deep);
        assert!(fields.contains(&"_CGinstance".to_string()));
        // Named after the net's first relation, the one inside `inner`.
        assert!(
            fields.contains(&"_CGbuffer_top_inner_relation1_0_int".to_string()),
            "{:?}",
            fields
        );
        assert!(fields.contains(&"_CGindex_top_source_output".to_string()));
        assert!(fields.contains(&"_CGindex_top_inner_sink_input".to_string()));
        assert!(!fields.iter().any(|f| f.starts_with("_CGrelation_")));
    }

    #[test]
    fn test_shallow_mode_keeps_relations() {
        let fields = top_fields(CodegenMode::Shallow);
        assert!(fields.contains(&"_CGrelation_wire".to_string()));
        assert!(!fields.iter().any(|f| f.starts_with("_CGbuffer_")));
    }

    #[test]
    fn test_missing_buffer_size_is_unresolvable() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: source, class: Const }
              - { kind: atomic, name: sink, class: Discard }
            connections:
              - { from: source.output, to: sink.input }
        "});
        let mut ctx = context_with_config(&model, SpecializerConfig::default());
        InstanceClassPass.run(&mut ctx).unwrap();
        let err = CompositePass.run(&mut ctx).unwrap_err();
        assert!(matches!(err, SpecializeError::Unresolvable { .. }));
    }

    #[test]
    fn test_fire_follows_schedule() {
        let model = model_from_yaml(PIPELINE);
        let mut ctx = context_with_config(&model, SpecializerConfig::default());
        InstanceClassPass.run(&mut ctx).unwrap();
        CompositePass.run(&mut ctx).unwrap();
        let fire = ctx.scene.method("generated.top", "fire").unwrap();
        let fired: Vec<&str> = fire
            .body
            .as_ref()
            .unwrap()
            .stmts
            .iter()
            .filter_map(Stmt::invoke)
            .filter(|i| i.method == "fire")
            .map(|i| i.class.as_str())
            .collect();
        assert_eq!(fired, vec!["generated.top_source", "generated.top_inner"]);
    }
}
