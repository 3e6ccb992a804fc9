//! Class/method/statement representation the pipeline rewrites.

pub mod builder;
pub mod cfg;
pub mod dataflow;
pub mod defs;
pub mod hierarchy;
pub mod printer;
pub mod scene;
pub mod tags;
pub mod types;

pub use builder::BodyBuilder;
pub use cfg::Cfg;
pub use dataflow::{solve_forward, ForwardAnalysis};
pub use defs::{LocalDefs, LocalUses};
pub use hierarchy::ClassHierarchy;
pub use printer::Printer;
pub use scene::{Body, Class, ClassId, ClassKind, Field, Method, Scene};
pub use tags::ValueTag;
pub use types::{
    BinOp, Cond, CondOp, Const, Expr, FieldRef, InvokeExpr, InvokeKind, Operand, Place, Stmt,
    Type, UnOp,
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IrError {
    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("unknown method `{class}.{method}`")]
    UnknownMethod { class: String, method: String },

    #[error("unknown field `{class}.{field}`")]
    UnknownField { class: String, field: String },

    #[error("class `{0}` already exists")]
    DuplicateClass(String),

    #[error("field `{class}.{field}` already exists")]
    DuplicateField { class: String, field: String },

    #[error("method `{class}.{method}` already exists")]
    DuplicateMethod { class: String, method: String },

    #[error("method `{class}.{method}` has no body")]
    MissingBody { class: String, method: String },

    #[error("jump to unknown label `{0}`")]
    UnknownLabel(String),

    #[error("conflicting tag on field `{field}`: {message}")]
    TagConflict { field: String, message: String },

    #[error("class hierarchy built at generation {built} is stale (scene is at {current})")]
    StaleHierarchy { built: u64, current: u64 },
}
