//! Data values: the value-type lattice and the tokens that inhabit it.

pub mod lattice;
pub mod token;

pub use lattice::ValueType;
pub use token::{Arith, InvokeArg, InvokeResult, Primitive, Token, TokenError};
