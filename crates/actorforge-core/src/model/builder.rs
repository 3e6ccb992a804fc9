use super::{
    ActionSpec, Attribute, AttributeId, AttributeKind, AttributeOwner, Component, ComponentId,
    ComponentKind, FsmSpec, Model, ModelError, Port, PortId, Relation, RelationId, StateSpec,
    TransitionSpec,
};
use crate::data::{Token, ValueType};
use crate::expr::{self, ExprError};
use id_arena::Arena;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Direction, arity and declared type of a port.
///
/// An `Unknown` value type is inferred when the model is built: inputs take
/// the join of everything connected to them, outputs the join of the
/// `derived_from` names (parameters or ports of the same component).
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub input: bool,
    pub output: bool,
    pub multiport: bool,
    pub value_type: ValueType,
    pub derived_from: Vec<String>,
}

impl PortSpec {
    pub fn input(value_type: ValueType) -> Self {
        PortSpec {
            input: true,
            output: false,
            multiport: false,
            value_type,
            derived_from: Vec::new(),
        }
    }

    pub fn output(value_type: ValueType) -> Self {
        PortSpec {
            input: false,
            output: true,
            multiport: false,
            value_type,
            derived_from: Vec::new(),
        }
    }

    pub fn multiport(mut self) -> Self {
        self.multiport = true;
        self
    }

    pub fn derived_from(mut self, names: &[&str]) -> Self {
        self.derived_from = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

/// A transition described by state names.
#[derive(Debug, Clone, Default)]
pub struct TransitionDesc {
    pub from: String,
    pub to: String,
    pub guard: String,
    pub choice_actions: Vec<(String, String)>,
    pub commit_actions: Vec<(String, String)>,
    pub reset: bool,
}

impl TransitionDesc {
    pub fn new(from: &str, to: &str, guard: &str) -> Self {
        TransitionDesc {
            from: from.to_string(),
            to: to.to_string(),
            guard: guard.to_string(),
            ..Default::default()
        }
    }

    pub fn choice(mut self, destination: &str, expression: &str) -> Self {
        self.choice_actions
            .push((destination.to_string(), expression.to_string()));
        self
    }

    pub fn commit(mut self, destination: &str, expression: &str) -> Self {
        self.commit_actions
            .push((destination.to_string(), expression.to_string()));
        self
    }

    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }
}

/// Incrementally assembles a [`Model`], then evaluates parameters and infers
/// port types in [`ModelBuilder::build`].
pub struct ModelBuilder {
    model: Model,
    derived: FxHashMap<PortId, Vec<String>>,
    refinements: Vec<(ComponentId, usize, String)>,
}

impl ModelBuilder {
    pub fn new(top_name: &str) -> Self {
        let mut components = Arena::new();
        let top = components.alloc(Component {
            name: top_name.to_string(),
            parent: None,
            kind: ComponentKind::Composite {
                children: Vec::new(),
                relations: Vec::new(),
            },
            ports: Vec::new(),
            attributes: Vec::new(),
        });
        ModelBuilder {
            model: Model {
                components,
                ports: Arena::new(),
                relations: Arena::new(),
                attributes: Arena::new(),
                top,
            },
            derived: FxHashMap::default(),
            refinements: Vec::new(),
        }
    }

    pub fn top(&self) -> ComponentId {
        self.model.top
    }

    /// Read access while building, e.g. to look up ids by name.
    pub fn model(&self) -> &Model {
        &self.model
    }

    fn add_component(
        &mut self,
        parent: ComponentId,
        name: &str,
        kind: ComponentKind,
    ) -> Result<ComponentId, ModelError> {
        if !self.model.is_composite(parent) {
            return Err(ModelError::NotComposite(self.model.full_name(parent)));
        }
        if self.model.child_by_name(parent, name).is_some() {
            return Err(ModelError::DuplicateName {
                kind: "component",
                name: name.to_string(),
                container: self.model.full_name(parent),
            });
        }
        let id = self.model.components.alloc(Component {
            name: name.to_string(),
            parent: Some(parent),
            kind,
            ports: Vec::new(),
            attributes: Vec::new(),
        });
        if let ComponentKind::Composite { children, .. } = &mut self.model.components[parent].kind
        {
            children.push(id);
        }
        Ok(id)
    }

    pub fn add_atomic(
        &mut self,
        parent: ComponentId,
        name: &str,
        class: &str,
    ) -> Result<ComponentId, ModelError> {
        self.add_component(
            parent,
            name,
            ComponentKind::Atomic {
                class: class.to_string(),
            },
        )
    }

    pub fn add_composite(
        &mut self,
        parent: ComponentId,
        name: &str,
    ) -> Result<ComponentId, ModelError> {
        self.add_component(
            parent,
            name,
            ComponentKind::Composite {
                children: Vec::new(),
                relations: Vec::new(),
            },
        )
    }

    pub fn add_state_machine(
        &mut self,
        parent: ComponentId,
        name: &str,
    ) -> Result<ComponentId, ModelError> {
        self.add_component(parent, name, ComponentKind::StateMachine(FsmSpec::default()))
    }

    fn fsm_mut(&mut self, id: ComponentId) -> Result<&mut FsmSpec, ModelError> {
        let name = self.model.full_name(id);
        match &mut self.model.components[id].kind {
            ComponentKind::StateMachine(spec) => Ok(spec),
            _ => Err(ModelError::NotStateMachine(name)),
        }
    }

    /// Add a state; `refinement` names a sibling component of the state
    /// machine and is resolved in [`ModelBuilder::build`].
    pub fn add_state(
        &mut self,
        fsm: ComponentId,
        name: &str,
        refinement: Option<&str>,
    ) -> Result<(), ModelError> {
        let container = self.model.full_name(fsm);
        let spec = self.fsm_mut(fsm)?;
        if spec.state_index(name).is_some() {
            return Err(ModelError::DuplicateName {
                kind: "state",
                name: name.to_string(),
                container,
            });
        }
        spec.states.push(StateSpec {
            name: name.to_string(),
            refinement: None,
        });
        let index = spec.states.len() - 1;
        if let Some(refinement) = refinement {
            self.refinements.push((fsm, index, refinement.to_string()));
        }
        Ok(())
    }

    pub fn set_initial_state(&mut self, fsm: ComponentId, name: &str) -> Result<(), ModelError> {
        let container = self.model.full_name(fsm);
        let spec = self.fsm_mut(fsm)?;
        spec.initial_state = spec.state_index(name).ok_or_else(|| ModelError::NotFound {
            kind: "state",
            name: name.to_string(),
            container,
        })?;
        Ok(())
    }

    pub fn add_transition(
        &mut self,
        fsm: ComponentId,
        desc: TransitionDesc,
    ) -> Result<(), ModelError> {
        let container = self.model.full_name(fsm);
        let spec = self.fsm_mut(fsm)?;
        let lookup = |name: &str| {
            spec.state_index(name).ok_or_else(|| ModelError::NotFound {
                kind: "state",
                name: name.to_string(),
                container: container.clone(),
            })
        };
        let source = lookup(&desc.from)?;
        let destination = lookup(&desc.to)?;
        let actions = |list: Vec<(String, String)>| {
            list.into_iter()
                .map(|(destination, expression)| ActionSpec {
                    destination,
                    expression,
                })
                .collect()
        };
        spec.transitions.push(TransitionSpec {
            source,
            destination,
            guard: desc.guard,
            choice_actions: actions(desc.choice_actions),
            commit_actions: actions(desc.commit_actions),
            reset: desc.reset,
        });
        Ok(())
    }

    pub fn add_port(
        &mut self,
        owner: ComponentId,
        name: &str,
        spec: PortSpec,
    ) -> Result<PortId, ModelError> {
        if self.model.port_by_name(owner, name).is_some() {
            return Err(ModelError::DuplicateName {
                kind: "port",
                name: name.to_string(),
                container: self.model.full_name(owner),
            });
        }
        let id = self.model.ports.alloc(Port {
            name: name.to_string(),
            owner,
            input: spec.input,
            output: spec.output,
            multiport: spec.multiport,
            value_type: spec.value_type,
            links: Vec::new(),
            inside_links: Vec::new(),
        });
        self.model.components[owner].ports.push(id);
        if !spec.derived_from.is_empty() {
            self.derived.insert(id, spec.derived_from);
        }
        Ok(id)
    }

    fn add_attribute(
        &mut self,
        owner: AttributeOwner,
        name: &str,
        kind: AttributeKind,
        expression: Option<&str>,
    ) -> Result<AttributeId, ModelError> {
        let (siblings, container) = match owner {
            AttributeOwner::Component(c) => (
                self.model.components[c].attributes.clone(),
                self.model.full_name(c),
            ),
            AttributeOwner::Relation(r) => (
                self.model.relations[r].attributes.clone(),
                self.model.relation_full_name(r),
            ),
            AttributeOwner::Attribute(a) => (
                self.model.attributes[a].children.clone(),
                self.model.attribute_full_name(a),
            ),
        };
        if siblings
            .iter()
            .any(|s| self.model.attributes[*s].name == name)
        {
            return Err(ModelError::DuplicateName {
                kind: "attribute",
                name: name.to_string(),
                container,
            });
        }
        let id = self.model.attributes.alloc(Attribute {
            name: name.to_string(),
            owner,
            kind,
            expression: expression.map(str::to_string),
            value: None,
            children: Vec::new(),
        });
        match owner {
            AttributeOwner::Component(c) => self.model.components[c].attributes.push(id),
            AttributeOwner::Relation(r) => self.model.relations[r].attributes.push(id),
            AttributeOwner::Attribute(a) => self.model.attributes[a].children.push(id),
        }
        Ok(id)
    }

    pub fn add_parameter(
        &mut self,
        owner: ComponentId,
        name: &str,
        expression: &str,
    ) -> Result<AttributeId, ModelError> {
        self.add_attribute(
            AttributeOwner::Component(owner),
            name,
            AttributeKind::Parameter,
            Some(expression),
        )
    }

    pub fn add_string_parameter(
        &mut self,
        owner: ComponentId,
        name: &str,
        value: &str,
    ) -> Result<AttributeId, ModelError> {
        self.add_attribute(
            AttributeOwner::Component(owner),
            name,
            AttributeKind::StringParameter,
            Some(value),
        )
    }

    /// A non-settable attribute such as an annotation or a director.
    pub fn add_plain_attribute(
        &mut self,
        owner: ComponentId,
        name: &str,
    ) -> Result<AttributeId, ModelError> {
        self.add_attribute(
            AttributeOwner::Component(owner),
            name,
            AttributeKind::Plain,
            None,
        )
    }

    pub fn add_nested_parameter(
        &mut self,
        owner: AttributeId,
        name: &str,
        expression: &str,
    ) -> Result<AttributeId, ModelError> {
        self.add_attribute(
            AttributeOwner::Attribute(owner),
            name,
            AttributeKind::Parameter,
            Some(expression),
        )
    }

    pub fn add_relation(
        &mut self,
        container: ComponentId,
        name: &str,
        width: usize,
    ) -> Result<RelationId, ModelError> {
        if !self.model.is_composite(container) {
            return Err(ModelError::NotComposite(self.model.full_name(container)));
        }
        if self.model.relation_by_name(container, name).is_some() {
            return Err(ModelError::DuplicateName {
                kind: "relation",
                name: name.to_string(),
                container: self.model.full_name(container),
            });
        }
        let id = self.model.relations.alloc(Relation {
            name: name.to_string(),
            container,
            width,
            attributes: Vec::new(),
            ports: Vec::new(),
        });
        if let ComponentKind::Composite { relations, .. } =
            &mut self.model.components[container].kind
        {
            relations.push(id);
        }
        Ok(id)
    }

    pub fn add_relation_parameter(
        &mut self,
        relation: RelationId,
        name: &str,
        expression: &str,
    ) -> Result<AttributeId, ModelError> {
        self.add_attribute(
            AttributeOwner::Relation(relation),
            name,
            AttributeKind::Parameter,
            Some(expression),
        )
    }

    pub fn set_buffer_size(
        &mut self,
        relation: RelationId,
        size: usize,
    ) -> Result<AttributeId, ModelError> {
        self.add_relation_parameter(relation, "bufferSize", &size.to_string())
    }

    /// Link a port to a relation. The relation must live either in the
    /// port owner's container (an outside link) or, for composite boundary
    /// ports, inside the owner itself.
    pub fn link(&mut self, port: PortId, relation: RelationId) -> Result<(), ModelError> {
        let owner = self.model.ports[port].owner;
        let container = self.model.relations[relation].container;
        let invalid = |builder: &Self, reason: &str| ModelError::InvalidLink {
            port: builder.model.port_full_name(port),
            relation: builder.model.relation_full_name(relation),
            reason: reason.to_string(),
        };

        let inside = if container == owner {
            if !self.model.is_composite(owner) {
                return Err(invalid(self, "only composite ports have inside links"));
            }
            true
        } else if self.model.components[owner].parent == Some(container) {
            false
        } else {
            return Err(invalid(self, "relation is not visible from the port"));
        };

        if self.model.relations[relation].ports.contains(&port) {
            return Err(invalid(self, "already linked"));
        }
        let entry = &mut self.model.ports[port];
        if inside {
            entry.inside_links.push(relation);
        } else {
            entry.links.push(relation);
        }
        self.model.relations[relation].ports.push(port);
        Ok(())
    }

    /// Connect two ports with a fresh width-1 relation in `container`.
    pub fn connect(
        &mut self,
        container: ComponentId,
        from: PortId,
        to: PortId,
    ) -> Result<RelationId, ModelError> {
        let name = format!(
            "relation{}",
            self.model.contained_relations(container).len() + 1
        );
        let relation = self.add_relation(container, &name, 1)?;
        self.link(from, relation)?;
        self.link(to, relation)?;
        Ok(relation)
    }

    pub fn build(mut self) -> Result<Model, ModelError> {
        self.resolve_refinements()?;
        self.evaluate_attributes()?;
        self.infer_port_types();
        Ok(self.model)
    }

    fn resolve_refinements(&mut self) -> Result<(), ModelError> {
        for (fsm, state, name) in std::mem::take(&mut self.refinements) {
            let parent = self.model.components[fsm]
                .parent
                .ok_or_else(|| ModelError::NotComposite(self.model.full_name(fsm)))?;
            let refinement =
                self.model
                    .child_by_name(parent, &name)
                    .ok_or_else(|| ModelError::NotFound {
                        kind: "refinement",
                        name: name.clone(),
                        container: self.model.full_name(parent),
                    })?;
            if let ComponentKind::StateMachine(spec) = &mut self.model.components[fsm].kind {
                spec.states[state].refinement = Some(refinement);
            }
        }
        Ok(())
    }

    fn evaluate_attributes(&mut self) -> Result<(), ModelError> {
        let ids: Vec<AttributeId> = self.model.attributes.iter().map(|(id, _)| id).collect();
        let mut values: FxHashMap<AttributeId, Token> = FxHashMap::default();
        let mut in_progress = FxHashSet::default();
        for id in ids {
            evaluate_attribute(&self.model, id, &mut values, &mut in_progress)?;
        }
        for (id, value) in values {
            self.model.attributes[id].value = Some(value);
        }
        Ok(())
    }

    /// Fixed-point type inference over ports whose declared type is
    /// `Unknown`. Types only rise, so the iteration terminates.
    fn infer_port_types(&mut self) {
        let unresolved: Vec<PortId> = self
            .model
            .ports
            .iter()
            .filter(|(_, p)| p.value_type == ValueType::Unknown)
            .map(|(id, _)| id)
            .collect();
        loop {
            let mut changed = false;
            for port_id in &unresolved {
                let port = &self.model.ports[*port_id];
                let inferred = if port.input {
                    self.model
                        .sources_of(*port_id)
                        .iter()
                        .fold(ValueType::Unknown, |acc, s| {
                            acc.join(&self.model.ports[*s].value_type)
                        })
                } else {
                    self.derived_output_type(*port_id)
                };
                let current = &self.model.ports[*port_id].value_type;
                let joined = current.join(&inferred);
                if &joined != current {
                    debug!(
                        "Inferred type {} for port {}",
                        joined,
                        self.model.port_full_name(*port_id)
                    );
                    self.model.ports[*port_id].value_type = joined;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn derived_output_type(&self, port_id: PortId) -> ValueType {
        let owner = self.model.ports[port_id].owner;
        let inputs = || {
            self.model.components[owner]
                .ports
                .iter()
                .filter(|p| self.model.ports[**p].input)
                .fold(ValueType::Unknown, |acc, p| {
                    acc.join(&self.model.ports[*p].value_type)
                })
        };
        let Some(names) = self.derived.get(&port_id) else {
            return inputs();
        };
        names.iter().fold(ValueType::Unknown, |acc, name| {
            if let Some(p) = self.model.port_by_name(owner, name) {
                return acc.join(&self.model.ports[p].value_type);
            }
            match self
                .model
                .attribute_by_name(owner, name)
                .and_then(|a| self.model.attributes[a].value.as_ref())
            {
                Some(value) => acc.join(&value.value_type()),
                None => acc,
            }
        })
    }
}

fn evaluate_attribute(
    model: &Model,
    id: AttributeId,
    values: &mut FxHashMap<AttributeId, Token>,
    in_progress: &mut FxHashSet<AttributeId>,
) -> Result<Option<Token>, ModelError> {
    if let Some(value) = values.get(&id) {
        return Ok(Some(value.clone()));
    }
    let attribute = &model.attributes[id];
    let Some(text) = attribute.expression.as_deref() else {
        return Ok(None);
    };
    if attribute.kind == AttributeKind::StringParameter {
        let value = Token::string(text);
        values.insert(id, value.clone());
        return Ok(Some(value));
    }
    if attribute.kind == AttributeKind::Plain {
        return Ok(None);
    }
    if !in_progress.insert(id) {
        return Err(ModelError::CyclicAttribute(model.attribute_full_name(id)));
    }

    let wrap = |source: ExprError| ModelError::Evaluation {
        attribute: model.attribute_full_name(id),
        source,
    };
    let parsed = expr::parse(text).map_err(wrap)?;

    let mut bindings = FxHashMap::default();
    for name in parsed.free_variables() {
        if let Some(target) = model.lookup_in_scope(id, &name) {
            if let Some(value) = evaluate_attribute(model, target, values, in_progress)? {
                bindings.insert(name, value);
            }
        }
    }
    let scope = |name: &str| bindings.get(name).cloned();
    let result = expr::evaluate(&parsed, &scope);
    in_progress.remove(&id);
    let value = match result {
        Ok(value) => value,
        // Depends on something only known at run time; the constant
        // analysis decides what happens to it.
        Err(ExprError::Unbound(_)) | Err(ExprError::Unsupported(_)) => {
            debug!(
                "Leaving {} unevaluated",
                model.attribute_full_name(id)
            );
            return Ok(None);
        }
        Err(e) => return Err(wrap(e)),
    };
    values.insert(id, value.clone());
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_into_sink() -> (ModelBuilder, ComponentId, ComponentId) {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let ramp = builder.add_atomic(top, "ramp", "Ramp").unwrap();
        let sink = builder.add_atomic(top, "sink", "Discard").unwrap();
        let out = builder
            .add_port(
                ramp,
                "output",
                PortSpec::output(ValueType::Unknown).derived_from(&["init", "step"]),
            )
            .unwrap();
        let input = builder
            .add_port(sink, "input", PortSpec::input(ValueType::Unknown).multiport())
            .unwrap();
        builder.add_parameter(ramp, "init", "base").unwrap();
        builder.add_parameter(ramp, "step", "0.5").unwrap();
        builder.add_parameter(top, "base", "2").unwrap();
        builder.connect(top, out, input).unwrap();
        (builder, ramp, sink)
    }

    #[test]
    fn test_parameters_resolve_through_containers() {
        let (builder, ramp, _) = ramp_into_sink();
        let model = builder.build().unwrap();
        let init = model.attribute_by_name(ramp, "init").unwrap();
        assert_eq!(model.attribute(init).value, Some(Token::Int(2)));
    }

    #[test]
    fn test_port_types_are_inferred() {
        let (builder, ramp, sink) = ramp_into_sink();
        let model = builder.build().unwrap();
        let out = model.port_by_name(ramp, "output").unwrap();
        let input = model.port_by_name(sink, "input").unwrap();
        assert_eq!(model.port(out).value_type, ValueType::Double);
        assert_eq!(model.port(input).value_type, ValueType::Double);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        builder.add_atomic(top, "a", "Const").unwrap();
        assert!(matches!(
            builder.add_atomic(top, "a", "Const"),
            Err(ModelError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_cyclic_parameters() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        builder.add_parameter(top, "a", "b + 1").unwrap();
        builder.add_parameter(top, "b", "a + 1").unwrap();
        assert!(matches!(
            builder.build(),
            Err(ModelError::CyclicAttribute(_))
        ));
    }

    #[test]
    fn test_link_visibility() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let inner = builder.add_composite(top, "inner").unwrap();
        let leaf = builder.add_atomic(inner, "leaf", "Discard").unwrap();
        let port = builder
            .add_port(leaf, "input", PortSpec::input(ValueType::Int))
            .unwrap();
        let outer = builder.add_relation(top, "r", 1).unwrap();
        assert!(matches!(
            builder.link(port, outer),
            Err(ModelError::InvalidLink { .. })
        ));
    }

    #[test]
    fn test_nets_cross_composite_boundaries() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let source = builder.add_atomic(top, "src", "Const").unwrap();
        let out = builder
            .add_port(source, "output", PortSpec::output(ValueType::Int))
            .unwrap();
        let inner = builder.add_composite(top, "inner").unwrap();
        let boundary = builder
            .add_port(inner, "in", PortSpec::input(ValueType::Unknown))
            .unwrap();
        let leaf = builder.add_atomic(inner, "leaf", "Discard").unwrap();
        let leaf_in = builder
            .add_port(leaf, "input", PortSpec::input(ValueType::Unknown))
            .unwrap();
        builder.connect(top, out, boundary).unwrap();
        builder.connect(inner, boundary, leaf_in).unwrap();
        let model = builder.build().unwrap();

        assert_eq!(model.sources_of(leaf_in), vec![out]);
        assert_eq!(model.destinations_of(out), vec![leaf_in]);
        assert_eq!(model.port(leaf_in).value_type, ValueType::Int);
    }

    #[test]
    fn test_string_parameters_are_not_parsed() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let p = builder.add_string_parameter(top, "label", "a + b").unwrap();
        let model = builder.build().unwrap();
        assert_eq!(model.attribute(p).value, Some(Token::string("a + b")));
    }
}
