use crate::data::ValueType;
use crate::model::{AttributeId, ComponentId, PortId, RelationId};

/// The model object a generated field stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueTag {
    Component(ComponentId),
    Port(PortId),
    Attribute(AttributeId),
    Relation(RelationId),
    /// Cached token of a non-constant parameter.
    AttributeToken(AttributeId),
    /// Circular buffer for one channel of a relation net and one
    /// destination type.
    Buffer {
        relation: RelationId,
        channel: usize,
        value_type: ValueType,
    },
    /// Per-channel read/write positions of a port.
    PortIndex(PortId),
}

impl ValueTag {
    pub fn component(&self) -> Option<ComponentId> {
        match self {
            ValueTag::Component(id) => Some(*id),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<PortId> {
        match self {
            ValueTag::Port(id) => Some(*id),
            _ => None,
        }
    }

    pub fn attribute(&self) -> Option<AttributeId> {
        match self {
            ValueTag::Attribute(id) => Some(*id),
            _ => None,
        }
    }
}
