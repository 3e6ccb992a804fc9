//! The component graph a specialization run starts from.
//!
//! A [`Model`] is built once (programmatically through [`ModelBuilder`] or
//! from a [`ModelDescription`]) and only read afterwards. Components, ports,
//! relations and attributes live in arenas and refer to each other by id;
//! ids double as identities, so two ports are never confused even when they
//! share a name.

mod builder;
pub mod description;
pub mod naming;

pub use builder::{ModelBuilder, PortSpec, TransitionDesc};
pub use description::ModelDescription;

use crate::data::{Token, ValueType};
use crate::expr::ExprError;
use id_arena::{Arena, Id};
use thiserror::Error;

pub type ComponentId = Id<Component>;
pub type PortId = Id<Port>;
pub type RelationId = Id<Relation>;
pub type AttributeId = Id<Attribute>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("duplicate {kind} `{name}` in `{container}`")]
    DuplicateName {
        kind: &'static str,
        name: String,
        container: String,
    },

    #[error("no {kind} named `{name}` in `{container}`")]
    NotFound {
        kind: &'static str,
        name: String,
        container: String,
    },

    #[error("`{0}` is not a composite")]
    NotComposite(String),

    #[error("`{0}` is not a state machine")]
    NotStateMachine(String),

    #[error("cannot link `{port}` to `{relation}`: {reason}")]
    InvalidLink {
        port: String,
        relation: String,
        reason: String,
    },

    #[error("cannot evaluate `{attribute}`: {source}")]
    Evaluation {
        attribute: String,
        #[source]
        source: ExprError,
    },

    #[error("attribute `{0}` depends on itself")]
    CyclicAttribute(String),

    #[error("invalid model description: {0}")]
    Description(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub enum ComponentKind {
    /// A leaf actor implemented by a library class.
    Atomic { class: String },
    Composite {
        children: Vec<ComponentId>,
        relations: Vec<RelationId>,
    },
    StateMachine(FsmSpec),
}

#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub parent: Option<ComponentId>,
    pub kind: ComponentKind,
    pub ports: Vec<PortId>,
    pub attributes: Vec<AttributeId>,
}

#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub owner: ComponentId,
    pub input: bool,
    pub output: bool,
    pub multiport: bool,
    pub value_type: ValueType,
    /// Relations in the owner's container, in link order.
    pub links: Vec<RelationId>,
    /// Relations inside the owner (composite boundary ports only).
    pub inside_links: Vec<RelationId>,
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub name: String,
    pub container: ComponentId,
    pub width: usize,
    pub attributes: Vec<AttributeId>,
    pub ports: Vec<PortId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeOwner {
    Component(ComponentId),
    Relation(RelationId),
    Attribute(AttributeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Settable, evaluated expression
    Parameter,
    /// Settable, value is the raw text
    StringParameter,
    /// Not settable; carries no value
    Plain,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub owner: AttributeOwner,
    pub kind: AttributeKind,
    pub expression: Option<String>,
    pub value: Option<Token>,
    pub children: Vec<AttributeId>,
}

impl Attribute {
    pub fn is_settable(&self) -> bool {
        !matches!(self.kind, AttributeKind::Plain)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FsmSpec {
    pub states: Vec<StateSpec>,
    pub transitions: Vec<TransitionSpec>,
    pub initial_state: usize,
}

#[derive(Debug, Clone)]
pub struct StateSpec {
    pub name: String,
    pub refinement: Option<ComponentId>,
}

#[derive(Debug, Clone)]
pub struct TransitionSpec {
    pub source: usize,
    pub destination: usize,
    pub guard: String,
    pub choice_actions: Vec<ActionSpec>,
    pub commit_actions: Vec<ActionSpec>,
    pub reset: bool,
}

/// `destination = expression`; the destination names an output port of the
/// state machine or a parameter reachable from its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub destination: String,
    pub expression: String,
}

impl FsmSpec {
    pub fn state_index(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == name)
    }

    /// Transitions leaving `state`, paired with their global index, in
    /// declaration order.
    pub fn outgoing(&self, state: usize) -> impl Iterator<Item = (usize, &TransitionSpec)> {
        self.transitions
            .iter()
            .enumerate()
            .filter(move |(_, t)| t.source == state)
    }
}

/// Relations joined through composite boundary ports, with the atomic ports
/// they connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Net {
    pub relations: Vec<RelationId>,
    pub ports: Vec<PortId>,
}

#[derive(Debug)]
pub struct Model {
    pub(crate) components: Arena<Component>,
    pub(crate) ports: Arena<Port>,
    pub(crate) relations: Arena<Relation>,
    pub(crate) attributes: Arena<Attribute>,
    pub(crate) top: ComponentId,
}

impl Model {
    pub fn top(&self) -> ComponentId {
        self.top
    }

    pub fn component(&self, id: ComponentId) -> &Component {
        &self.components[id]
    }

    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id]
    }

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id]
    }

    pub fn attribute(&self, id: AttributeId) -> &Attribute {
        &self.attributes[id]
    }

    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &Component)> {
        self.components.iter()
    }

    pub fn relations(&self) -> impl Iterator<Item = (RelationId, &Relation)> {
        self.relations.iter()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (AttributeId, &Attribute)> {
        self.attributes.iter()
    }

    pub fn children(&self, id: ComponentId) -> &[ComponentId] {
        match &self.components[id].kind {
            ComponentKind::Composite { children, .. } => children,
            _ => &[],
        }
    }

    pub fn contained_relations(&self, id: ComponentId) -> &[RelationId] {
        match &self.components[id].kind {
            ComponentKind::Composite { relations, .. } => relations,
            _ => &[],
        }
    }

    pub fn is_composite(&self, id: ComponentId) -> bool {
        matches!(self.components[id].kind, ComponentKind::Composite { .. })
    }

    pub fn fsm(&self, id: ComponentId) -> Option<&FsmSpec> {
        match &self.components[id].kind {
            ComponentKind::StateMachine(spec) => Some(spec),
            _ => None,
        }
    }

    /// `.top.a.b` style path name.
    pub fn full_name(&self, id: ComponentId) -> String {
        let component = &self.components[id];
        match component.parent {
            Some(parent) => format!("{}.{}", self.full_name(parent), component.name),
            None => format!(".{}", component.name),
        }
    }

    pub fn port_full_name(&self, id: PortId) -> String {
        let port = &self.ports[id];
        format!("{}.{}", self.full_name(port.owner), port.name)
    }

    pub fn relation_full_name(&self, id: RelationId) -> String {
        let relation = &self.relations[id];
        format!("{}.{}", self.full_name(relation.container), relation.name)
    }

    pub fn attribute_full_name(&self, id: AttributeId) -> String {
        let attribute = &self.attributes[id];
        let prefix = match attribute.owner {
            AttributeOwner::Component(c) => self.full_name(c),
            AttributeOwner::Relation(r) => self.relation_full_name(r),
            AttributeOwner::Attribute(a) => self.attribute_full_name(a),
        };
        format!("{}.{}", prefix, attribute.name)
    }

    /// The component whose scope an attribute belongs to.
    pub fn attribute_component(&self, id: AttributeId) -> ComponentId {
        match self.attributes[id].owner {
            AttributeOwner::Component(c) => c,
            AttributeOwner::Relation(r) => self.relations[r].container,
            AttributeOwner::Attribute(a) => self.attribute_component(a),
        }
    }

    pub fn child_by_name(&self, id: ComponentId, name: &str) -> Option<ComponentId> {
        self.children(id)
            .iter()
            .copied()
            .find(|c| self.components[*c].name == name)
    }

    pub fn port_by_name(&self, id: ComponentId, name: &str) -> Option<PortId> {
        self.components[id]
            .ports
            .iter()
            .copied()
            .find(|p| self.ports[*p].name == name)
    }

    pub fn attribute_by_name(&self, id: ComponentId, name: &str) -> Option<AttributeId> {
        self.components[id]
            .attributes
            .iter()
            .copied()
            .find(|a| self.attributes[*a].name == name)
    }

    pub fn nested_attribute(&self, id: AttributeId, name: &str) -> Option<AttributeId> {
        self.attributes[id]
            .children
            .iter()
            .copied()
            .find(|a| self.attributes[*a].name == name)
    }

    pub fn relation_attribute(&self, id: RelationId, name: &str) -> Option<AttributeId> {
        self.relations[id]
            .attributes
            .iter()
            .copied()
            .find(|a| self.attributes[*a].name == name)
    }

    pub fn relation_by_name(&self, container: ComponentId, name: &str) -> Option<RelationId> {
        self.contained_relations(container)
            .iter()
            .copied()
            .find(|r| self.relations[*r].name == name)
    }

    /// Resolve an identifier the way parameter expressions see it: the
    /// component's own attributes first, then each enclosing container.
    pub fn resolve_identifier(&self, scope: ComponentId, name: &str) -> Option<AttributeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(found) = self.attribute_by_name(id, name) {
                return Some(found);
            }
            current = self.components[id].parent;
        }
        None
    }

    /// Resolve an identifier appearing in an attribute's expression:
    /// sibling attributes first (nested or relation parameters), then the
    /// owning component's scope chain. An attribute never sees itself.
    pub fn lookup_in_scope(&self, attribute: AttributeId, name: &str) -> Option<AttributeId> {
        let siblings = match self.attributes[attribute].owner {
            AttributeOwner::Component(_) => None,
            AttributeOwner::Relation(r) => self.relation_attribute(r, name),
            AttributeOwner::Attribute(a) => self.nested_attribute(a, name),
        };
        siblings
            .filter(|s| *s != attribute)
            .or_else(|| self.resolve_identifier(self.attribute_component(attribute), name))
            .filter(|s| *s != attribute)
    }

    /// Resolve a dotted attribute path (`a`, `child.a`, `child.a.nested`)
    /// relative to `scope`.
    pub fn resolve_attribute_path(&self, scope: ComponentId, path: &str) -> Option<AttributeId> {
        let mut segments = path.split('.').peekable();
        let mut component = scope;
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                if let Some(child) = self.child_by_name(component, segment) {
                    component = child;
                    continue;
                }
            }
            let mut attribute = self.attribute_by_name(component, segment)?;
            for nested in segments.by_ref() {
                attribute = self.nested_attribute(attribute, nested)?;
            }
            return Some(attribute);
        }
        None
    }

    /// Number of channels on a port's outside links.
    pub fn port_width(&self, id: PortId) -> usize {
        self.ports[id]
            .links
            .iter()
            .map(|r| self.relations[*r].width)
            .sum()
    }

    pub fn inside_width(&self, id: PortId) -> usize {
        self.ports[id]
            .inside_links
            .iter()
            .map(|r| self.relations[*r].width)
            .sum()
    }

    /// Components that execute their own code: atomic actors and state
    /// machines.
    pub fn is_leaf(&self, id: ComponentId) -> bool {
        !self.is_composite(id)
    }

    /// True if a sibling state machine uses `id` as a state refinement.
    pub fn is_refinement(&self, id: ComponentId) -> bool {
        let Some(parent) = self.components[id].parent else {
            return false;
        };
        self.children(parent).iter().any(|sibling| {
            self.fsm(*sibling)
                .map(|spec| spec.states.iter().any(|s| s.refinement == Some(id)))
                .unwrap_or(false)
        })
    }

    /// Components in post-order: every child precedes its container.
    pub fn post_order(&self) -> Vec<ComponentId> {
        let mut order = Vec::new();
        self.collect_post_order(self.top, &mut order);
        order
    }

    fn collect_post_order(&self, id: ComponentId, order: &mut Vec<ComponentId>) {
        for child in self.children(id) {
            self.collect_post_order(*child, order);
        }
        order.push(id);
    }

    /// Follow a relation through composite boundary ports and collect the
    /// leaf ports on the resulting net.
    pub fn net_of(&self, start: RelationId) -> Net {
        let mut relations = vec![start];
        let mut ports = Vec::new();
        let mut i = 0;
        while i < relations.len() {
            let relation = relations[i];
            for port_id in &self.relations[relation].ports {
                let port = &self.ports[*port_id];
                if self.is_leaf(port.owner) {
                    if !ports.contains(port_id) {
                        ports.push(*port_id);
                    }
                    continue;
                }
                let across = if port.links.contains(&relation) {
                    &port.inside_links
                } else {
                    &port.links
                };
                for next in across {
                    if !relations.contains(next) {
                        relations.push(*next);
                    }
                }
            }
            i += 1;
        }
        Net { relations, ports }
    }

    /// Leaf output ports that can deliver tokens to `port`.
    pub fn sources_of(&self, port: PortId) -> Vec<PortId> {
        let mut sources = Vec::new();
        for relation in &self.ports[port].links {
            for candidate in self.net_of(*relation).ports {
                if self.ports[candidate].output && candidate != port && !sources.contains(&candidate)
                {
                    sources.push(candidate);
                }
            }
        }
        sources
    }

    /// Leaf input ports that receive what `port` sends.
    pub fn destinations_of(&self, port: PortId) -> Vec<PortId> {
        let mut destinations = Vec::new();
        for relation in &self.ports[port].links {
            for candidate in self.net_of(*relation).ports {
                if self.ports[candidate].input
                    && candidate != port
                    && !destinations.contains(&candidate)
                {
                    destinations.push(candidate);
                }
            }
        }
        destinations
    }
}
