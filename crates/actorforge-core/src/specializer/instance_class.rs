//! One generated class per leaf component.
//!
//! The actor's library class chain, up to the first root class, is folded
//! into a single class: fields and methods are copied subclass-first and
//! every reference to a chain class is retargeted to the new class. A
//! fresh constructor creates the component's ports and attributes from the
//! model instead of running the library constructors.

use super::{fsm, Context, Pass};
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{
    Body, BodyBuilder, Class, ClassKind, Expr, Field, FieldRef, InvokeExpr, InvokeKind, Method,
    Operand, Place, Stmt, Type, ValueTag,
};
use crate::library::tokens::{emit_token, token_type};
use crate::library::ROOT_CLASSES;
use crate::model::{naming, AttributeId, AttributeKind, ComponentId, ComponentKind};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tracing::{debug, info};

pub struct InstanceClassPass;

impl Pass for InstanceClassPass {
    fn name(&self) -> &'static str {
        "instance-classes"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let mut created = 0;
        for id in ctx.model.post_order() {
            match &ctx.model.component(id).kind {
                ComponentKind::Atomic { class } => {
                    build_instance_class(ctx, id, class)?;
                    created += 1;
                }
                ComponentKind::StateMachine(_) => {
                    fsm::build_fsm_class(ctx, id)?;
                    created += 1;
                }
                ComponentKind::Composite { .. } => {}
            }
        }
        info!("Generated {} instance classes", created);
        Ok(created > 0)
    }
}

pub(crate) fn container_params() -> Vec<(String, Type)> {
    vec![
        ("container".to_string(), Type::object("CompositeEntity")),
        ("name".to_string(), Type::object("String")),
    ]
}

fn build_instance_class(ctx: &mut Context<'_>, id: ComponentId, actor_class: &str) -> Result<()> {
    let generated = ctx.class_of(id).to_string();
    let location = ctx.location(id);
    if !ctx.scene.contains(actor_class) {
        return Err(SpecializeError::unresolvable(
            location,
            format!("unknown actor class `{}`", actor_class),
        ));
    }
    let ancestors = ctx.scene.ancestors(actor_class);
    let root_index = ancestors
        .iter()
        .position(|c| ROOT_CLASSES.contains(&c.as_str()))
        .ok_or_else(|| {
            SpecializeError::unsupported(
                location.clone(),
                format!("`{}` does not derive from an actor root class", actor_class),
            )
        })?;
    let chain: Vec<String> = ancestors[..root_index].to_vec();
    let root = ancestors[root_index].clone();
    debug!(
        "Folding {} into {} (root {})",
        chain.join(" <- "),
        generated,
        root
    );

    let mut class = Class::new(&generated, Some(&root), ClassKind::Application);
    let folder = ChainFolder::new(ctx, &chain, &generated, &root);

    for chain_class in &chain {
        let source = ctx.scene.expect_class(chain_class)?;
        for field in source.fields.values() {
            if class.fields.contains_key(&field.name) {
                continue;
            }
            let mut copy = Field::new(field.name.clone(), folder.retype(&field.ty));
            copy.is_static = field.is_static;
            class.add_field(copy)?;
        }
    }
    for chain_class in &chain {
        let source = ctx.scene.expect_class(chain_class)?;
        for method in source.methods.values() {
            if method.is_constructor() {
                continue;
            }
            let name = folder.method_name(chain_class, &method.name).to_string();
            let mut copy = method.clone();
            copy.name = name;
            copy.params = copy
                .params
                .iter()
                .map(|(p, ty)| (p.clone(), folder.retype(ty)))
                .collect();
            copy.ret = folder.retype(&copy.ret);
            if let Some(body) = copy.body.as_mut() {
                folder.fold_body(body);
            }
            class.add_method(copy)?;
        }
    }

    layout_members(ctx, id, &mut class)?;
    let mut init = Method::new("<init>", container_params(), Type::Void, false, &generated);
    if let Some(body) = init.body.as_mut() {
        let mut b = BodyBuilder::new(body);
        b.invoke(InvokeExpr::special(
            Operand::local("this"),
            root.as_str(),
            "<init>",
            vec![Operand::local("container"), Operand::local("name")],
        ));
        emit_member_init(ctx, &mut b, id)?;
        b.ret(None);
        b.append();
    }
    class.add_method(init)?;
    ctx.scene.add_class(class)?;
    Ok(())
}

/// Rewrites references to the classes of a folded chain.
struct ChainFolder<'c> {
    chain: &'c [String],
    generated: &'c str,
    root: &'c str,
    /// `(chain class, method)` to the name the method has in the folded
    /// class. A method overridden further down keeps its body under a
    /// `name$Class` alias so super calls can still reach it.
    names: IndexMap<(String, String), String>,
}

impl<'c> ChainFolder<'c> {
    fn new(ctx: &Context<'_>, chain: &'c [String], generated: &'c str, root: &'c str) -> Self {
        let mut names = IndexMap::new();
        let mut taken = FxHashSet::default();
        for chain_class in chain {
            let Some(class) = ctx.scene.class(chain_class) else {
                continue;
            };
            for method in class.methods.values() {
                if method.is_constructor() {
                    continue;
                }
                let name = if taken.contains(&method.name) {
                    format!("{}${}", method.name, naming::simple_name(chain_class))
                } else {
                    method.name.clone()
                };
                taken.insert(name.clone());
                names.insert((chain_class.clone(), method.name.clone()), name);
            }
        }
        ChainFolder {
            chain,
            generated,
            root,
            names,
        }
    }

    fn in_chain(&self, class: &str) -> bool {
        self.chain.iter().any(|c| c == class)
    }

    fn method_name<'a>(&'a self, class: &str, method: &'a str) -> &'a str {
        self.names
            .get(&(class.to_string(), method.to_string()))
            .map(String::as_str)
            .unwrap_or(method)
    }

    fn retype(&self, ty: &Type) -> Type {
        match ty {
            Type::Ref(class) if self.in_chain(class) => Type::object(self.generated),
            Type::Array(element) => Type::array_of(self.retype(element)),
            other => other.clone(),
        }
    }

    fn retarget_field(&self, field: &mut FieldRef) {
        if self.in_chain(&field.class) {
            field.class = self.generated.to_string();
        }
    }

    /// A non-virtual call naming a chain class runs the first declaration
    /// at or above that class.
    fn retarget_direct(&self, invoke: &mut InvokeExpr) {
        let Some(start) = self.chain.iter().position(|c| *c == invoke.class) else {
            return;
        };
        let declared = self.chain[start..]
            .iter()
            .find_map(|c| self.names.get(&(c.clone(), invoke.method.clone())));
        match declared {
            Some(name) => {
                invoke.class = self.generated.to_string();
                invoke.method = name.clone();
            }
            None => invoke.class = self.root.to_string(),
        }
    }

    fn fold_body(&self, body: &mut Body) {
        for ty in body.locals.values_mut() {
            *ty = self.retype(ty);
        }
        for stmt in &mut body.stmts {
            self.fold_stmt(stmt);
        }
    }

    fn fold_stmt(&self, stmt: &mut Stmt) {
        if let Stmt::Assign(place, expr) = stmt {
            match place {
                Place::InstanceField(_, field) | Place::StaticField(field) => {
                    self.retarget_field(field)
                }
                Place::Local(_) | Place::ArrayElem(..) => {}
            }
            match expr {
                Expr::InstanceField(_, field) | Expr::StaticField(field) => {
                    self.retarget_field(field)
                }
                Expr::Cast(ty, _) | Expr::InstanceOf(_, ty) | Expr::NewArray(ty, _) => {
                    *ty = self.retype(ty)
                }
                Expr::New(class) if self.in_chain(class) => *class = self.generated.to_string(),
                _ => {}
            }
        }
        if let Some(invoke) = stmt.invoke_mut() {
            invoke.ret = self.retype(&invoke.ret);
            match invoke.kind {
                InvokeKind::Special | InvokeKind::Static => self.retarget_direct(invoke),
                InvokeKind::Virtual | InvokeKind::Interface => {
                    if self.in_chain(&invoke.class) {
                        invoke.class = self.generated.to_string();
                    }
                }
            }
        }
    }
}

/// Attributes of a component with their field names, parents before
/// nested children.
pub(crate) fn component_attributes(
    ctx: &Context<'_>,
    id: ComponentId,
) -> Vec<(AttributeId, String, Option<AttributeId>)> {
    fn visit(
        ctx: &Context<'_>,
        attribute: AttributeId,
        prefix: &str,
        parent: Option<AttributeId>,
        out: &mut Vec<(AttributeId, String, Option<AttributeId>)>,
    ) {
        let name = &ctx.model.attribute(attribute).name;
        let path = if prefix.is_empty() {
            naming::sanitize(name)
        } else {
            format!("{}_{}", prefix, naming::sanitize(name))
        };
        out.push((attribute, path.clone(), parent));
        for child in &ctx.model.attribute(attribute).children {
            visit(ctx, *child, &path, Some(attribute), out);
        }
    }

    let mut out = Vec::new();
    for attribute in &ctx.model.component(id).attributes {
        visit(ctx, *attribute, "", None, &mut out);
    }
    out
}

fn attribute_class(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::Parameter => "Parameter",
        AttributeKind::StringParameter => "StringParameter",
        AttributeKind::Plain => "Attribute",
    }
}

/// Add or tag a field for `name`. Fields copied from the library chain
/// already exist under the same name and only gain the tag.
fn tagged_field<'c>(class: &'c mut Class, name: &str, ty: Type, tag: ValueTag) -> Result<&'c mut Field> {
    let field = class
        .fields
        .entry(name.to_string())
        .or_insert_with(|| Field::new(name, ty));
    field.set_value_tag(tag)?;
    Ok(field)
}

/// Give the component's ports and attributes fields in `class`, plus the
/// token fields and compute methods of non-constant attributes.
pub(crate) fn layout_members(ctx: &mut Context<'_>, id: ComponentId, class: &mut Class) -> Result<()> {
    let model = ctx.model;
    for port_id in &model.component(id).ports {
        let port = model.port(*port_id);
        let name = naming::sanitize(&port.name);
        let field = tagged_field(
            class,
            &name,
            Type::object("TypedIOPort"),
            ValueTag::Port(*port_id),
        )?;
        field.set_type_tag(port.value_type.clone())?;
        ctx.register_port_field(*port_id, FieldRef::new(class.name.clone(), name));
    }

    for (attribute_id, name, _) in component_attributes(ctx, id) {
        let attribute = model.attribute(attribute_id);
        let field = tagged_field(
            class,
            &name,
            Type::object(attribute_class(attribute.kind)),
            ValueTag::Attribute(attribute_id),
        )?;
        if let Some(value) = &attribute.value {
            field.set_type_tag(value.value_type())?;
        }
        ctx.register_attribute_field(attribute_id, FieldRef::new(class.name.clone(), name.clone()));

        if !attribute.is_settable() || ctx.constants.is_constant(attribute_id) {
            continue;
        }
        let free_variables = match attribute.expression.as_deref() {
            Some(text) if attribute.kind == AttributeKind::Parameter => {
                let parsed = ctx.parser.parse(text)?;
                ctx.parser.free_variables(&parsed)
            }
            _ => Vec::new(),
        };
        if ctx.constants.is_seeded(attribute_id) || free_variables.is_empty() {
            let token_name = format!("_CGtoken_{}", name);
            let mut field = Field::new(&token_name, token_type());
            field.set_value_tag(ValueTag::AttributeToken(attribute_id))?;
            if let Some(value) = &attribute.value {
                field.set_type_tag(value.value_type())?;
            }
            class.add_field(field)?;
            ctx.register_token_field(attribute_id, FieldRef::new(class.name.clone(), token_name));
        } else {
            let method_name = format!("_CGcompute_{}", name);
            let text = attribute.expression.clone().unwrap_or_default();
            let mut method = Method::new(&method_name, Vec::new(), token_type(), false, &class.name);
            if let Some(body) = method.body.as_mut() {
                let mut b = BodyBuilder::new(body);
                let parser = b.new_object("PtParser", Vec::new());
                let value = b.call(
                    "$t",
                    InvokeExpr::virtual_call(
                        Operand::local(parser),
                        "PtParser",
                        "evaluate",
                        vec![Operand::str(text)],
                        token_type(),
                    ),
                );
                b.ret(Some(Operand::local(value)));
                b.append();
            }
            class.add_method(method)?;
            ctx.register_compute_method(attribute_id, class.name.clone(), method_name);
        }
    }
    Ok(())
}

/// Constructor code creating the component's ports and attributes and
/// seeding the token fields.
pub(crate) fn emit_member_init(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    id: ComponentId,
) -> Result<()> {
    let model = ctx.model;
    let this = || Operand::local("this");
    let missing = |what: &str| {
        SpecializeError::invariant(ctx.location(id), format!("no field for {}", what))
    };

    for port_id in &model.component(id).ports {
        let port = model.port(*port_id);
        let field = ctx
            .port_field(*port_id)
            .cloned()
            .ok_or_else(|| missing(&port.name))?;
        let object = b.new_object(
            "TypedIOPort",
            vec![
                this(),
                Operand::str(port.name.clone()),
                Operand::bool(port.input),
                Operand::bool(port.output),
            ],
        );
        if port.multiport {
            b.invoke(InvokeExpr::virtual_call(
                Operand::local(&object),
                "IOPort",
                "setMultiport",
                vec![Operand::bool(true)],
                Type::Void,
            ));
        }
        b.set_field(this(), field, Operand::local(object));
    }

    for (attribute_id, _, parent) in component_attributes(ctx, id) {
        let attribute = model.attribute(attribute_id);
        let field = ctx
            .attribute_field(attribute_id)
            .cloned()
            .ok_or_else(|| missing(&attribute.name))?;
        let container = match parent {
            None => this(),
            Some(parent) => {
                let parent_field = ctx
                    .attribute_field(parent)
                    .cloned()
                    .ok_or_else(|| missing(&model.attribute(parent).name))?;
                let ty = Type::object(attribute_class(model.attribute(parent).kind));
                Operand::local(b.get_field(this(), parent_field, ty))
            }
        };
        let class = attribute_class(attribute.kind);
        let object = b.new_object(class, vec![container, Operand::str(attribute.name.clone())]);
        if let (true, Some(expression)) = (attribute.is_settable(), &attribute.expression) {
            b.invoke(InvokeExpr::virtual_call(
                Operand::local(&object),
                "Variable",
                "setExpression",
                vec![Operand::str(expression.clone())],
                Type::Void,
            ));
        }
        b.set_field(this(), field, Operand::local(object));

        if let Some(token_field) = ctx.token_field(attribute_id) {
            let value = attribute.value.as_ref().ok_or_else(|| {
                SpecializeError::unresolvable(
                    Location::component(model.attribute_full_name(attribute_id)),
                    "attribute written at run time has no initial value",
                )
            })?;
            let token = emit_token(b, value);
            b.set_field(this(), token_field.clone(), Operand::local(token));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ValueType;
    use crate::ir::Printer;
    use crate::specializer::test_support::context_for;
    use crate::model::{Model, ModelBuilder, PortSpec};

    fn ramp_model() -> Model {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let ramp = builder.add_atomic(top, "ramp", "Ramp").unwrap();
        builder
            .add_port(ramp, "output", PortSpec::output(ValueType::Int))
            .unwrap();
        builder
            .add_port(ramp, "trigger", PortSpec::input(ValueType::Unknown).multiport())
            .unwrap();
        builder.add_parameter(ramp, "init", "0").unwrap();
        builder.add_parameter(ramp, "step", "2").unwrap();
        builder.add_parameter(ramp, "firingCountLimit", "0").unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_ramp_chain_is_folded() {
        let model = ramp_model();
        let mut ctx = context_for(&model);
        InstanceClassPass.run(&mut ctx).unwrap();
        let class = ctx.scene.class("generated.top_ramp").unwrap();
        assert_eq!(class.superclass.as_deref(), Some("TypedAtomicActor"));
        // Ramp.fire overrides Source.fire, which survives under an alias.
        assert!(class.methods.contains_key("fire"));
        assert!(class.methods.contains_key("fire$Source"));
        assert!(class.methods.contains_key("postfire$LimitedFiringSource"));
        assert!(class.fields.contains_key("_stateToken"));
        let ramp = model.child_by_name(model.top(), "ramp").unwrap();
        let step = model.attribute_by_name(ramp, "step").unwrap();
        assert_eq!(class.fields["step"].value_tag(), Some(&ValueTag::Attribute(step)));
        assert_eq!(class.fields["output"].type_tag(), Some(&ValueType::Int));
    }

    #[test]
    fn test_folded_bodies_reference_only_the_new_class() {
        let model = ramp_model();
        let mut ctx = context_for(&model);
        InstanceClassPass.run(&mut ctx).unwrap();
        let class = ctx.scene.class("generated.top_ramp").unwrap();
        let printed = Printer::new().class_to_string(class);
        for library in ["<Ramp:", "<LimitedFiringSource:", "<Source:"] {
            assert!(!printed.contains(library), "{} left in\n{}", library, printed);
        }
        let fire = class.methods["fire"].body.as_ref().unwrap();
        let super_call = fire
            .stmts
            .iter()
            .filter_map(Stmt::invoke)
            .find(|i| i.kind == InvokeKind::Special)
            .unwrap();
        assert_eq!(super_call.class, "generated.top_ramp");
        assert_eq!(super_call.method, "fire$Source");
    }

    #[test]
    fn test_unknown_actor_class_is_unresolvable() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        builder.add_atomic(top, "mystery", "NoSuchActor").unwrap();
        let model = builder.build().unwrap();
        let mut ctx = context_for(&model);
        let err = InstanceClassPass.run(&mut ctx).unwrap_err();
        assert!(matches!(err, SpecializeError::Unresolvable { .. }));
    }
}
