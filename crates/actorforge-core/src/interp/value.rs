//! Runtime values and the heap they point into.

use crate::data::Token;
use crate::ir::{Const, Type};
use id_arena::{Arena, Id};
use rustc_hash::FxHashMap;
use std::fmt;

pub type ObjectId = Id<Object>;
pub type ArrayId = Id<ArrayData>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Object(ObjectId),
    Array(ArrayId),
}

impl Value {
    /// The zero value of a field or array element of type `ty`.
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Boolean => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Long => Value::Long(0),
            Type::Double => Value::Double(0.0),
            _ => Value::Null,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            other => other.as_i64().map(|i| i as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Primitive constant for token construction; `None` for references.
    pub fn to_const(&self) -> Option<Const> {
        Some(match self {
            Value::Null => Const::Null,
            Value::Bool(b) => Const::Bool(*b),
            Value::Int(i) => Const::Int(*i),
            Value::Long(l) => Const::Long(*l),
            Value::Double(d) => Const::Double(*d),
            Value::Str(s) => Const::Str(s.clone()),
            Value::Object(_) | Value::Array(_) => return None,
        })
    }
}

impl From<&Const> for Value {
    fn from(c: &Const) -> Self {
        match c {
            Const::Null => Value::Null,
            Const::Bool(b) => Value::Bool(*b),
            Const::Int(i) => Value::Int(*i),
            Const::Long(l) => Value::Long(*l),
            Const::Double(d) => Value::Double(*d),
            Const::Str(s) => Value::Str(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}L", l),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(id) => write!(f, "object#{}", id.index()),
            Value::Array(id) => write!(f, "array#{}", id.index()),
        }
    }
}

#[derive(Debug)]
pub struct Object {
    pub class: String,
    pub fields: FxHashMap<String, Value>,
    /// Set once the constructor of a token class has run.
    pub token: Option<Token>,
}

#[derive(Debug)]
pub struct ArrayData {
    pub element: Type,
    pub values: Vec<Value>,
    /// The first field the array was stored in or read from; loads and
    /// stores are traced under its name.
    pub origin: Option<String>,
}

#[derive(Debug, Default)]
pub struct Heap {
    objects: Arena<Object>,
    arrays: Arena<ArrayData>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, class: &str) -> ObjectId {
        self.objects.alloc(Object {
            class: class.to_string(),
            fields: FxHashMap::default(),
            token: None,
        })
    }

    pub fn alloc_token(&mut self, token: Token) -> ObjectId {
        let class = token.value_type().token_class();
        let id = self.alloc(class);
        self.objects[id].token = Some(token);
        id
    }

    pub fn alloc_array(&mut self, element: Type, length: usize) -> ArrayId {
        let values = vec![Value::default_for(&element); length];
        self.arrays.alloc(ArrayData {
            element,
            values,
            origin: None,
        })
    }

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id]
    }

    pub fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id]
    }

    pub fn array(&self, id: ArrayId) -> &ArrayData {
        &self.arrays[id]
    }

    pub fn array_mut(&mut self, id: ArrayId) -> &mut ArrayData {
        &mut self.arrays[id]
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// The token a value refers to, if it is a constructed token object.
    pub fn token(&self, value: &Value) -> Option<&Token> {
        match value {
            Value::Object(id) => self.objects[*id].token.as_ref(),
            _ => None,
        }
    }
}
