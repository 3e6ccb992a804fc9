//! Serde form of a model, loaded from JSON or YAML by the CLI.
//!
//! ```yaml
//! name: top
//! parameters:
//!   iterations: "3"
//! entities:
//!   - kind: atomic
//!     name: source
//!     class: Const
//!     parameters: { value: "5" }
//!   - kind: atomic
//!     name: sink
//!     class: Discard
//! connections:
//!   - { from: source.output, to: sink.input, bufferSize: 1 }
//! ```
//!
//! Atomic entities get the ports and default parameters of their actor class
//! template; anything listed in the description is added or overrides.

use super::{ComponentId, Model, ModelBuilder, ModelError, PortId, PortSpec, TransitionDesc};
use crate::data::ValueType;
use crate::library::actor_template;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescription {
    pub name: String,
    #[serde(flatten)]
    pub body: CompositeBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeBody {
    #[serde(default)]
    pub ports: Vec<PortDescription>,
    #[serde(default)]
    pub parameters: IndexMap<String, String>,
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
    #[serde(default)]
    pub relations: Vec<RelationDescription>,
    #[serde(default)]
    pub connections: Vec<ConnectionDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntityDescription {
    Atomic {
        name: String,
        class: String,
        #[serde(default)]
        ports: Vec<PortDescription>,
        #[serde(default)]
        parameters: IndexMap<String, String>,
    },
    Composite(ModelDescription),
    #[serde(rename_all = "camelCase")]
    Fsm {
        name: String,
        #[serde(default)]
        ports: Vec<PortDescription>,
        #[serde(default)]
        parameters: IndexMap<String, String>,
        initial_state: String,
        states: Vec<StateDescription>,
        #[serde(default)]
        transitions: Vec<TransitionDescription>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescription {
    pub name: String,
    pub direction: Direction,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub multiport: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDescription {
    pub name: String,
    #[serde(default)]
    pub refinement: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescription {
    pub destination: String,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDescription {
    pub from: String,
    pub to: String,
    #[serde(default = "default_guard")]
    pub guard: String,
    #[serde(default)]
    pub choice: Vec<ActionDescription>,
    #[serde(default)]
    pub commit: Vec<ActionDescription>,
    #[serde(default)]
    pub reset: bool,
}

fn default_guard() -> String {
    "true".to_string()
}

fn default_width() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDescription {
    pub name: String,
    #[serde(default = "default_width")]
    pub width: usize,
    #[serde(default)]
    pub buffer_size: Option<usize>,
    #[serde(default)]
    pub parameters: IndexMap<String, String>,
    /// `entity.port` for contained entities, a bare port name for the
    /// container's own boundary ports.
    #[serde(default)]
    pub links: Vec<String>,
}

/// Shorthand for a width-1 relation between two ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescription {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub buffer_size: Option<usize>,
}

impl ModelDescription {
    pub fn from_json(text: &str) -> Result<Self, ModelError> {
        serde_json::from_str(text).map_err(|e| ModelError::Description(e.to_string()))
    }

    pub fn from_yaml(text: &str) -> Result<Self, ModelError> {
        serde_yaml::from_str(text).map_err(|e| ModelError::Description(e.to_string()))
    }

    /// Load a description, choosing the format from the file extension
    /// (`.yaml`/`.yml`, anything else is read as JSON).
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            _ => Self::from_json(&text),
        }
    }

    pub fn into_model(self) -> Result<Model, ModelError> {
        let mut builder = ModelBuilder::new(&self.name);
        let top = builder.top();
        populate_composite(&mut builder, top, &self.body)?;
        builder.build()
    }
}

fn parse_type(text: Option<&str>) -> Result<ValueType, ModelError> {
    match text {
        None => Ok(ValueType::Unknown),
        Some(t) => t
            .parse()
            .map_err(|e: String| ModelError::Description(format!("bad port type `{}`: {}", t, e))),
    }
}

fn add_described_ports(
    builder: &mut ModelBuilder,
    owner: ComponentId,
    ports: &[PortDescription],
) -> Result<(), ModelError> {
    for port in ports {
        let value_type = parse_type(port.value_type.as_deref())?;
        let mut spec = match port.direction {
            Direction::Input => PortSpec::input(value_type),
            Direction::Output => PortSpec::output(value_type),
        };
        if port.multiport {
            spec = spec.multiport();
        }
        builder.add_port(owner, &port.name, spec)?;
    }
    Ok(())
}

fn add_parameters(
    builder: &mut ModelBuilder,
    owner: ComponentId,
    parameters: &IndexMap<String, String>,
) -> Result<(), ModelError> {
    for (name, expression) in parameters {
        builder.add_parameter(owner, name, expression)?;
    }
    Ok(())
}

fn populate_composite(
    builder: &mut ModelBuilder,
    composite: ComponentId,
    body: &CompositeBody,
) -> Result<(), ModelError> {
    add_described_ports(builder, composite, &body.ports)?;
    add_parameters(builder, composite, &body.parameters)?;

    for entity in &body.entities {
        match entity {
            EntityDescription::Atomic {
                name,
                class,
                ports,
                parameters,
            } => {
                let template = actor_template(class).ok_or_else(|| ModelError::NotFound {
                    kind: "actor class",
                    name: class.clone(),
                    container: builder.model().full_name(composite),
                })?;
                let id = builder.add_atomic(composite, name, class)?;
                for (port, spec) in template.ports {
                    builder.add_port(id, port, spec)?;
                }
                add_described_ports(builder, id, ports)?;
                for (param, default) in template.parameters {
                    let value = parameters
                        .get(param)
                        .map(String::as_str)
                        .unwrap_or(default);
                    builder.add_parameter(id, param, value)?;
                }
                for (param, value) in parameters {
                    if builder.model().attribute_by_name(id, param).is_none() {
                        builder.add_parameter(id, param, value)?;
                    }
                }
            }
            EntityDescription::Composite(nested) => {
                let id = builder.add_composite(composite, &nested.name)?;
                populate_composite(builder, id, &nested.body)?;
            }
            EntityDescription::Fsm {
                name,
                ports,
                parameters,
                initial_state,
                states,
                transitions,
            } => {
                let id = builder.add_state_machine(composite, name)?;
                add_described_ports(builder, id, ports)?;
                add_parameters(builder, id, parameters)?;
                for state in states {
                    builder.add_state(id, &state.name, state.refinement.as_deref())?;
                }
                builder.set_initial_state(id, initial_state)?;
                for t in transitions {
                    let mut desc = TransitionDesc::new(&t.from, &t.to, &t.guard);
                    for a in &t.choice {
                        desc = desc.choice(&a.destination, &a.expression);
                    }
                    for a in &t.commit {
                        desc = desc.commit(&a.destination, &a.expression);
                    }
                    desc.reset = t.reset;
                    builder.add_transition(id, desc)?;
                }
            }
        }
    }

    for relation in &body.relations {
        let id = builder.add_relation(composite, &relation.name, relation.width)?;
        if let Some(size) = relation.buffer_size {
            builder.set_buffer_size(id, size)?;
        }
        for (name, expression) in &relation.parameters {
            builder.add_relation_parameter(id, name, expression)?;
        }
        for link in &relation.links {
            let port = resolve_port(builder, composite, link)?;
            builder.link(port, id)?;
        }
    }

    for connection in &body.connections {
        let from = resolve_port(builder, composite, &connection.from)?;
        let to = resolve_port(builder, composite, &connection.to)?;
        let relation = builder.connect(composite, from, to)?;
        if let Some(size) = connection.buffer_size {
            builder.set_buffer_size(relation, size)?;
        }
    }
    Ok(())
}

fn resolve_port(
    builder: &ModelBuilder,
    composite: ComponentId,
    path: &str,
) -> Result<PortId, ModelError> {
    let model = builder.model();
    let not_found = || ModelError::NotFound {
        kind: "port",
        name: path.to_string(),
        container: model.full_name(composite),
    };
    match path.split_once('.') {
        Some((entity, port)) => {
            let child = model.child_by_name(composite, entity).ok_or_else(not_found)?;
            model.port_by_name(child, port).ok_or_else(not_found)
        }
        None => model.port_by_name(composite, path).ok_or_else(not_found),
    }
}
