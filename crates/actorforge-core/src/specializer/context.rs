//! State shared by every pass of one specialization run.

use super::constants::ConstantAttributes;
use crate::config::SpecializerConfig;
use crate::data::ValueType;
use crate::diagnostics::DiagnosticHandler;
use crate::errors::{Location, Result, SpecializeError};
use crate::expr::ExpressionParser;
use crate::ir::{BodyBuilder, FieldRef, Operand, Scene, Type};
use crate::model::{naming, AttributeId, ComponentId, Model, PortId, RelationId};
use indexmap::IndexMap;
use std::sync::Arc;

/// Identifies one buffer: a net, a channel on it and the value type the
/// readers of that channel expect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferKey {
    pub net: RelationId,
    pub channel: usize,
    pub value_type: ValueType,
}

pub struct Context<'m> {
    pub model: &'m Model,
    pub scene: Scene,
    pub config: Arc<SpecializerConfig>,
    pub parser: Arc<dyn ExpressionParser>,
    pub diagnostics: Arc<dyn DiagnosticHandler>,
    pub constants: ConstantAttributes,
    class_of: IndexMap<ComponentId, String>,
    component_of_class: IndexMap<String, ComponentId>,
    component_fields: IndexMap<ComponentId, FieldRef>,
    attribute_fields: IndexMap<AttributeId, FieldRef>,
    token_fields: IndexMap<AttributeId, FieldRef>,
    compute_methods: IndexMap<AttributeId, (String, String)>,
    port_fields: IndexMap<PortId, FieldRef>,
    buffers: IndexMap<BufferKey, FieldRef>,
    buffer_sizes: IndexMap<RelationId, usize>,
    index_fields: IndexMap<PortId, FieldRef>,
    main_class: Option<String>,
}

impl<'m> Context<'m> {
    pub fn new(
        model: &'m Model,
        scene: Scene,
        config: Arc<SpecializerConfig>,
        parser: Arc<dyn ExpressionParser>,
        diagnostics: Arc<dyn DiagnosticHandler>,
    ) -> Result<Self> {
        let constants = ConstantAttributes::analyze(model, parser.as_ref(), config.constant_policy)?;
        let mut class_of = IndexMap::new();
        let mut component_of_class = IndexMap::new();
        for id in model.post_order() {
            let class = naming::class_name(&config.target_package, &model.full_name(id));
            if let Some(previous) = component_of_class.insert(class.clone(), id) {
                return Err(SpecializeError::invariant(
                    Location::component(model.full_name(id)),
                    format!(
                        "class name `{}` is shared with `{}`",
                        class,
                        model.full_name(previous)
                    ),
                ));
            }
            class_of.insert(id, class);
        }
        Ok(Context {
            model,
            scene,
            config,
            parser,
            diagnostics,
            constants,
            class_of,
            component_of_class,
            component_fields: IndexMap::new(),
            attribute_fields: IndexMap::new(),
            token_fields: IndexMap::new(),
            compute_methods: IndexMap::new(),
            port_fields: IndexMap::new(),
            buffers: IndexMap::new(),
            buffer_sizes: IndexMap::new(),
            index_fields: IndexMap::new(),
            main_class: None,
        })
    }

    /// Generated class of a component. Every component has one.
    pub fn class_of(&self, id: ComponentId) -> &str {
        &self.class_of[&id]
    }

    pub fn component_of_class(&self, class: &str) -> Option<ComponentId> {
        self.component_of_class.get(class).copied()
    }

    pub fn top_class(&self) -> &str {
        self.class_of(self.model.top())
    }

    pub fn main_class(&self) -> Option<&str> {
        self.main_class.as_deref()
    }

    pub fn set_main_class(&mut self, class: String) {
        self.main_class = Some(class);
    }

    pub fn location(&self, id: ComponentId) -> Location {
        Location::component(self.model.full_name(id))
    }

    /// Record the field holding a component. A component has exactly one
    /// canonical field; registering it again must name the same field.
    pub fn register_component_field(&mut self, id: ComponentId, field: FieldRef) -> Result<()> {
        match self.component_fields.get(&id) {
            Some(existing) if *existing != field => Err(SpecializeError::invariant(
                self.location(id),
                format!(
                    "component already held by {}, cannot also be held by {}",
                    existing, field
                ),
            )),
            Some(_) => Ok(()),
            None => {
                self.component_fields.insert(id, field);
                Ok(())
            }
        }
    }

    pub fn component_field(&self, id: ComponentId) -> Option<&FieldRef> {
        self.component_fields.get(&id)
    }

    pub fn register_attribute_field(&mut self, id: AttributeId, field: FieldRef) {
        self.attribute_fields.insert(id, field);
    }

    pub fn attribute_field(&self, id: AttributeId) -> Option<&FieldRef> {
        self.attribute_fields.get(&id)
    }

    pub fn register_token_field(&mut self, id: AttributeId, field: FieldRef) {
        self.token_fields.insert(id, field);
    }

    /// Field caching the current token of a non-constant attribute.
    pub fn token_field(&self, id: AttributeId) -> Option<&FieldRef> {
        self.token_fields.get(&id)
    }

    pub fn register_compute_method(&mut self, id: AttributeId, class: String, method: String) {
        self.compute_methods.insert(id, (class, method));
    }

    /// Method recomputing a non-constant attribute from its expression.
    pub fn compute_method(&self, id: AttributeId) -> Option<(&str, &str)> {
        self.compute_methods
            .get(&id)
            .map(|(class, method)| (class.as_str(), method.as_str()))
    }

    /// The attribute whose compute method is `class.method`, if any.
    pub fn compute_attribute(&self, class: &str, method: &str) -> Option<AttributeId> {
        self.compute_methods
            .iter()
            .find(|(_, (c, m))| c == class && m == method)
            .map(|(id, _)| *id)
    }

    pub fn register_port_field(&mut self, id: PortId, field: FieldRef) {
        self.port_fields.insert(id, field);
    }

    pub fn port_field(&self, id: PortId) -> Option<&FieldRef> {
        self.port_fields.get(&id)
    }

    pub fn register_buffer(&mut self, key: BufferKey, field: FieldRef) {
        self.buffers.insert(key, field);
    }

    pub fn buffer(&self, key: &BufferKey) -> Option<&FieldRef> {
        self.buffers.get(key)
    }

    /// Buffers of one channel of a net, one per destination type.
    pub fn buffers_for(&self, net: RelationId, channel: usize) -> Vec<(&BufferKey, &FieldRef)> {
        self.buffers
            .iter()
            .filter(|(key, _)| key.net == net && key.channel == channel)
            .collect()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn set_buffer_size(&mut self, net: RelationId, size: usize) {
        self.buffer_sizes.insert(net, size);
    }

    pub fn buffer_size(&self, net: RelationId) -> Option<usize> {
        self.buffer_sizes.get(&net).copied()
    }

    pub fn register_index_field(&mut self, port: PortId, field: FieldRef) {
        self.index_fields.insert(port, field);
    }

    pub fn index_field(&self, port: PortId) -> Option<&FieldRef> {
        self.index_fields.get(&port)
    }

    /// Representative relation of the net `relation` belongs to: the one
    /// allocated first.
    pub fn net_key(&self, relation: RelationId) -> RelationId {
        self.model
            .net_of(relation)
            .relations
            .into_iter()
            .min()
            .unwrap_or(relation)
    }

    /// Emit code yielding a reference to `target` as seen from code running
    /// in `from`'s class. Descendants are reached through child fields from
    /// `this`; everything else goes through the static top instance.
    pub fn emit_component_ref(
        &self,
        b: &mut BodyBuilder<'_>,
        from: Option<ComponentId>,
        target: ComponentId,
    ) -> Result<Operand> {
        if from == Some(target) {
            return Ok(Operand::local("this"));
        }
        let mut path = Vec::new();
        let mut current = target;
        let from_ancestor = loop {
            if Some(current) == from {
                break true;
            }
            match self.model.component(current).parent {
                Some(parent) => {
                    path.push(current);
                    current = parent;
                }
                None => break false,
            }
        };

        let mut operand = if from_ancestor {
            Operand::local("this")
        } else {
            let top = self.model.top();
            let instance = self.component_field(top).cloned().ok_or_else(|| {
                SpecializeError::invariant(self.location(top), "top instance field not created")
            })?;
            Operand::local(b.get_static(instance, Type::object(self.class_of(top))))
        };
        for component in path.into_iter().rev() {
            let field = self.component_field(component).cloned().ok_or_else(|| {
                SpecializeError::unresolvable(
                    self.location(component),
                    "component has no field in its container",
                )
            })?;
            let ty = Type::object(self.class_of(component));
            operand = Operand::local(b.get_field(operand, field, ty));
        }
        Ok(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::expr::DefaultExpressionParser;
    use crate::ir::{Body, Expr, Stmt};
    use crate::model::ModelBuilder;

    fn model() -> Model {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let inner = builder.add_composite(top, "inner").unwrap();
        builder.add_atomic(inner, "leaf", "Discard").unwrap();
        builder.add_atomic(top, "other", "Discard").unwrap();
        builder.build().unwrap()
    }

    fn context(model: &Model) -> Context<'_> {
        Context::new(
            model,
            Scene::new(),
            Arc::new(SpecializerConfig::default()),
            Arc::new(DefaultExpressionParser),
            Arc::new(CollectingDiagnosticHandler::new()),
        )
        .unwrap()
    }

    fn register_fields(ctx: &mut Context<'_>) {
        let model = ctx.model;
        let top = model.top();
        ctx.register_component_field(top, FieldRef::new(ctx.top_class().to_string(), "_CGinstance"))
            .unwrap();
        for (id, component) in model.components() {
            if let Some(parent) = component.parent {
                let field = FieldRef::new(ctx.class_of(parent).to_string(), component.name.clone());
                ctx.register_component_field(id, field).unwrap();
            }
        }
    }

    #[test]
    fn test_class_names_follow_paths() {
        let model = model();
        let ctx = context(&model);
        let inner = model.child_by_name(model.top(), "inner").unwrap();
        let leaf = model.child_by_name(inner, "leaf").unwrap();
        assert_eq!(ctx.class_of(leaf), "generated.top_inner_leaf");
        assert_eq!(ctx.component_of_class("generated.top_inner"), Some(inner));
        assert_eq!(ctx.top_class(), "generated.top");
    }

    #[test]
    fn test_component_fields_are_canonical() {
        let model = model();
        let mut ctx = context(&model);
        let other = model.child_by_name(model.top(), "other").unwrap();
        let field = FieldRef::new("generated.top", "other");
        ctx.register_component_field(other, field.clone()).unwrap();
        ctx.register_component_field(other, field).unwrap();
        let err = ctx
            .register_component_field(other, FieldRef::new("generated.top", "alias"))
            .unwrap_err();
        assert!(matches!(err, SpecializeError::Invariant { .. }));
    }

    #[test]
    fn test_component_ref_from_descendant_goes_through_top() {
        let model = model();
        let mut ctx = context(&model);
        register_fields(&mut ctx);
        let inner = model.child_by_name(model.top(), "inner").unwrap();
        let leaf = model.child_by_name(inner, "leaf").unwrap();
        let other = model.child_by_name(model.top(), "other").unwrap();

        let mut body = Body::new();
        let mut b = BodyBuilder::new(&mut body);
        let operand = ctx.emit_component_ref(&mut b, Some(leaf), other).unwrap();
        let stmts = b.finish();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0], Stmt::Assign(_, Expr::StaticField(f)) if f.name == "_CGinstance"));
        assert_eq!(stmts[1].def(), operand.as_local());
    }

    #[test]
    fn test_component_ref_from_ancestor_starts_at_this() {
        let model = model();
        let mut ctx = context(&model);
        register_fields(&mut ctx);
        let inner = model.child_by_name(model.top(), "inner").unwrap();
        let leaf = model.child_by_name(inner, "leaf").unwrap();

        let mut body = Body::new();
        let mut b = BodyBuilder::new(&mut body);
        assert_eq!(
            ctx.emit_component_ref(&mut b, Some(leaf), leaf).unwrap(),
            Operand::local("this")
        );
        ctx.emit_component_ref(&mut b, Some(model.top()), leaf).unwrap();
        let stmts = b.finish();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(
            &stmts[0],
            Stmt::Assign(_, Expr::InstanceField(Operand::Local(base), _)) if base == "this"
        ));
    }
}
