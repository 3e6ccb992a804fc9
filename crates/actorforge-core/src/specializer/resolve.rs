//! Static resolution of IR values to the model objects they denote.
//!
//! Generated code reaches model objects through tagged fields and through
//! the generic accessors (`getContainer`, `getEntity`, `getAttribute`,
//! `getPort`, `getRelation`) with constant names. The resolver follows a
//! local back through its single reaching definition until it hits one of
//! those; anything else is unknown.

use crate::errors::Result;
use crate::ir::{Body, Const, Expr, InvokeExpr, LocalDefs, Operand, Scene, Stmt, ValueTag};
use crate::model::{AttributeId, AttributeOwner, ComponentId, Model, PortId, RelationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRef {
    Component(ComponentId),
    Port(PortId),
    Attribute(AttributeId),
    Relation(RelationId),
}

impl ModelRef {
    pub fn from_tag(tag: &ValueTag) -> Option<ModelRef> {
        Some(match tag {
            ValueTag::Component(c) => ModelRef::Component(*c),
            ValueTag::Port(p) => ModelRef::Port(*p),
            ValueTag::Attribute(a) => ModelRef::Attribute(*a),
            ValueTag::Relation(r) => ModelRef::Relation(*r),
            _ => return None,
        })
    }

    pub fn name(self, model: &Model) -> &str {
        match self {
            ModelRef::Component(c) => &model.component(c).name,
            ModelRef::Port(p) => &model.port(p).name,
            ModelRef::Attribute(a) => &model.attribute(a).name,
            ModelRef::Relation(r) => &model.relation(r).name,
        }
    }

    pub fn full_name(self, model: &Model) -> String {
        match self {
            ModelRef::Component(c) => model.full_name(c),
            ModelRef::Port(p) => model.port_full_name(p),
            ModelRef::Attribute(a) => model.attribute_full_name(a),
            ModelRef::Relation(r) => model.relation_full_name(r),
        }
    }
}

/// Accessor methods whose result the resolver can follow.
pub const ACCESSORS: &[&str] = &[
    "getContainer",
    "getEntity",
    "getAttribute",
    "getPort",
    "getRelation",
];

pub struct Resolver<'a> {
    model: &'a Model,
    scene: &'a Scene,
    this_component: Option<ComponentId>,
    body: &'a Body,
    defs: LocalDefs,
}

impl<'a> Resolver<'a> {
    /// `this_component` is the component whose class declares the body.
    pub fn new(
        model: &'a Model,
        scene: &'a Scene,
        this_component: Option<ComponentId>,
        body: &'a Body,
    ) -> Result<Self> {
        Ok(Resolver {
            model,
            scene,
            this_component,
            body,
            defs: LocalDefs::compute(body)?,
        })
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn defs(&self) -> &LocalDefs {
        &self.defs
    }

    pub fn body(&self) -> &Body {
        self.body
    }

    /// The model object `operand` holds when statement `at` executes.
    pub fn resolve(&self, operand: &Operand, at: usize) -> Option<ModelRef> {
        self.resolve_depth(operand, at, 0)
    }

    fn resolve_depth(&self, operand: &Operand, at: usize, depth: usize) -> Option<ModelRef> {
        // Every hop moves to an earlier definition; the bound guards
        // against malformed bodies.
        if depth > self.body.stmts.len() {
            return None;
        }
        let name = operand.as_local()?;
        let Some(def) = self.defs.single_def(name, at, self.body) else {
            if name == "this" && self.defs.all_defs(name).is_empty() {
                return self.this_component.map(ModelRef::Component);
            }
            return None;
        };
        match &self.body.stmts[def] {
            Stmt::Assign(_, expr) => match expr {
                Expr::Use(inner) | Expr::Cast(_, inner) => self.resolve_depth(inner, def, depth + 1),
                Expr::InstanceField(_, field) | Expr::StaticField(field) => self
                    .scene
                    .resolve_field(&field.class, &field.name)
                    .and_then(|(_, f)| f.value_tag())
                    .and_then(ModelRef::from_tag),
                Expr::Invoke(invoke) => self.resolve_invoke(invoke, def, depth + 1),
                _ => None,
            },
            _ => None,
        }
    }

    /// The model object an accessor call at statement `at` returns.
    pub fn resolve_accessor(&self, invoke: &InvokeExpr, at: usize) -> Option<ModelRef> {
        self.resolve_invoke(invoke, at, 0)
    }

    fn resolve_invoke(&self, invoke: &InvokeExpr, at: usize, depth: usize) -> Option<ModelRef> {
        if !ACCESSORS.contains(&invoke.method.as_str()) {
            return None;
        }
        let receiver = self.resolve_depth(invoke.base.as_ref()?, at, depth)?;
        if invoke.method == "getContainer" {
            return self.container_of(receiver);
        }
        let name = self.constant_string(invoke.args.first()?, at)?;
        self.lookup(receiver, &invoke.method, &name)
    }

    /// Apply accessor `method` with constant `name` to `receiver`.
    pub fn lookup(&self, receiver: ModelRef, method: &str, name: &str) -> Option<ModelRef> {
        let model = self.model;
        match (method, receiver) {
            ("getEntity", ModelRef::Component(c)) => {
                model.child_by_name(c, name).map(ModelRef::Component)
            }
            ("getAttribute", ModelRef::Component(c)) => {
                model.resolve_attribute_path(c, name).map(ModelRef::Attribute)
            }
            ("getAttribute", ModelRef::Attribute(a)) => {
                let mut current = a;
                for segment in name.split('.') {
                    current = model.nested_attribute(current, segment)?;
                }
                Some(ModelRef::Attribute(current))
            }
            ("getAttribute", ModelRef::Relation(r)) => {
                model.relation_attribute(r, name).map(ModelRef::Attribute)
            }
            ("getPort", ModelRef::Component(c)) => model.port_by_name(c, name).map(ModelRef::Port),
            ("getRelation", ModelRef::Component(c)) => {
                model.relation_by_name(c, name).map(ModelRef::Relation)
            }
            _ => None,
        }
    }

    fn container_of(&self, receiver: ModelRef) -> Option<ModelRef> {
        let model = self.model;
        match receiver {
            ModelRef::Component(c) => model.component(c).parent.map(ModelRef::Component),
            ModelRef::Port(p) => Some(ModelRef::Component(model.port(p).owner)),
            ModelRef::Relation(r) => Some(ModelRef::Component(model.relation(r).container)),
            ModelRef::Attribute(a) => Some(match model.attribute(a).owner {
                AttributeOwner::Component(c) => ModelRef::Component(c),
                AttributeOwner::Relation(r) => ModelRef::Relation(r),
                AttributeOwner::Attribute(parent) => ModelRef::Attribute(parent),
            }),
        }
    }

    pub fn constant(&self, operand: &Operand, at: usize) -> Option<Const> {
        self.defs.constant_at(operand, at, self.body)
    }

    pub fn constant_string(&self, operand: &Operand, at: usize) -> Option<String> {
        match self.constant(operand, at)? {
            Const::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ValueType;
    use crate::ir::{BodyBuilder, Class, ClassKind, Field, FieldRef, InvokeExpr, Type};
    use crate::model::{ModelBuilder, PortSpec};

    struct Fixture {
        model: Model,
        scene: Scene,
        ramp: ComponentId,
        sink: ComponentId,
    }

    fn fixture() -> Fixture {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let ramp = builder.add_atomic(top, "ramp", "Ramp").unwrap();
        builder
            .add_port(ramp, "output", PortSpec::output(ValueType::Int))
            .unwrap();
        let step = builder.add_parameter(ramp, "step", "1").unwrap();
        builder.add_nested_parameter(step, "scale", "2").unwrap();
        let sink = builder.add_atomic(top, "sink", "Discard").unwrap();
        let model = builder.build().unwrap();

        let mut scene = Scene::new();
        let mut class = Class::new("gen.top", None, ClassKind::Application);
        let field = class
            .add_field(Field::new("ramp", Type::object("gen.top_ramp")))
            .unwrap();
        field.set_value_tag(ValueTag::Component(ramp)).unwrap();
        scene.add_class(class).unwrap();
        Fixture {
            model,
            scene,
            ramp,
            sink,
        }
    }

    fn accessor(b: &mut BodyBuilder<'_>, base: &str, method: &str, name: Option<&str>) -> String {
        b.call(
            "$v",
            InvokeExpr::virtual_call(
                Operand::local(base),
                "NamedObj",
                method,
                name.map(Operand::str).into_iter().collect(),
                Type::object("NamedObj"),
            ),
        )
    }

    #[test]
    fn test_follows_accessor_chains() {
        let f = fixture();
        let mut body = Body::new();
        body.declare("this", Type::object("gen.top_sink"));
        let mut b = BodyBuilder::new(&mut body);
        let container = accessor(&mut b, "this", "getContainer", None);
        let ramp = accessor(&mut b, &container, "getEntity", Some("ramp"));
        let step = accessor(&mut b, &ramp, "getAttribute", Some("step"));
        let scale = accessor(&mut b, &step, "getAttribute", Some("scale"));
        let port = accessor(&mut b, &ramp, "getPort", Some("output"));
        b.ret(None);
        b.append();

        let resolver = Resolver::new(&f.model, &f.scene, Some(f.sink), &body).unwrap();
        let end = body.stmts.len() - 1;
        let at = |local: &str| resolver.resolve(&Operand::local(local), end);
        assert_eq!(at(&container), Some(ModelRef::Component(f.model.top())));
        assert_eq!(at(&ramp), Some(ModelRef::Component(f.ramp)));
        let step_id = f.model.attribute_by_name(f.ramp, "step").unwrap();
        assert_eq!(at(&step), Some(ModelRef::Attribute(step_id)));
        assert_eq!(
            at(&scale),
            Some(ModelRef::Attribute(f.model.nested_attribute(step_id, "scale").unwrap()))
        );
        assert_eq!(
            at(&port),
            Some(ModelRef::Port(f.model.port_by_name(f.ramp, "output").unwrap()))
        );
    }

    #[test]
    fn test_tagged_fields_and_casts() {
        let f = fixture();
        let mut body = Body::new();
        let mut b = BodyBuilder::new(&mut body);
        let read = b.get_field(
            Operand::local("this"),
            FieldRef::new("gen.top", "ramp"),
            Type::object("gen.top_ramp"),
        );
        let cast = b.eval(
            "$c",
            Type::object("ComponentEntity"),
            Expr::Cast(Type::object("ComponentEntity"), Operand::local(&read)),
        );
        b.ret(None);
        b.append();
        let resolver = Resolver::new(&f.model, &f.scene, None, &body).unwrap();
        assert_eq!(
            resolver.resolve(&Operand::local(cast), body.stmts.len() - 1),
            Some(ModelRef::Component(f.ramp))
        );
    }

    #[test]
    fn test_non_constant_names_do_not_resolve() {
        let f = fixture();
        let mut body = Body::new();
        body.declare("name", Type::object("String"));
        let mut b = BodyBuilder::new(&mut body);
        let entity = b.call(
            "$v",
            InvokeExpr::virtual_call(
                Operand::local("this"),
                "CompositeEntity",
                "getEntity",
                vec![Operand::local("name")],
                Type::object("ComponentEntity"),
            ),
        );
        b.ret(None);
        b.append();
        let resolver = Resolver::new(&f.model, &f.scene, Some(f.model.top()), &body).unwrap();
        assert_eq!(resolver.resolve(&Operand::local(entity), body.stmts.len() - 1), None);
        assert_eq!(
            resolver.resolve(&Operand::local("this"), 0),
            Some(ModelRef::Component(f.model.top()))
        );
    }
}
