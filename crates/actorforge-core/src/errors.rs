use crate::data::TokenError;
use crate::expr::ExprError;
use crate::ir::IrError;
use crate::model::ModelError;
use std::fmt;
use thiserror::Error;

/// Where in the model and the generated program a problem was found.
///
/// Every field is optional; the pipeline fills in whatever it knows at the
/// point of failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub component: Option<String>,
    pub class: Option<String>,
    pub method: Option<String>,
    pub stmt: Option<usize>,
}

impl Location {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn component(name: impl Into<String>) -> Self {
        Self {
            component: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            method: Some(method.into()),
            ..Self::default()
        }
    }

    pub fn at(mut self, stmt: usize) -> Self {
        self.stmt = Some(stmt);
        self
    }

    pub fn with_component(mut self, name: impl Into<String>) -> Self {
        self.component = Some(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.component.is_none() && self.class.is_none() && self.method.is_none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<unknown>");
        }
        let mut first = true;
        if let Some(component) = &self.component {
            write!(f, "component `{}`", component)?;
            first = false;
        }
        if let Some(class) = &self.class {
            if !first {
                write!(f, ", ")?;
            }
            match &self.method {
                Some(method) => write!(f, "method `{}.{}`", class, method)?,
                None => write!(f, "class `{}`", class)?,
            }
        }
        if let Some(stmt) = self.stmt {
            write!(f, " #{}", stmt)?;
        }
        Ok(())
    }
}

/// Errors raised by the specialization pipeline.
///
/// None of these are recovered from: each aborts the whole run.
#[derive(Debug, Error)]
pub enum SpecializeError {
    #[error("unresolvable value at {location}: {message}")]
    Unresolvable { location: Location, message: String },

    #[error("invariant violated at {location}: {message}")]
    Invariant { location: Location, message: String },

    #[error("unsupported construct at {location}: {message}")]
    Unsupported { location: Location, message: String },

    #[error("expression error: {0}")]
    Expression(#[from] ExprError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("specialization cancelled by the watchdog")]
    Cancelled,
}

impl SpecializeError {
    pub fn unresolvable(location: Location, message: impl Into<String>) -> Self {
        SpecializeError::Unresolvable {
            location,
            message: message.into(),
        }
    }

    pub fn invariant(location: Location, message: impl Into<String>) -> Self {
        SpecializeError::Invariant {
            location,
            message: message.into(),
        }
    }

    pub fn unsupported(location: Location, message: impl Into<String>) -> Self {
        SpecializeError::Unsupported {
            location,
            message: message.into(),
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            SpecializeError::Unresolvable { location, .. }
            | SpecializeError::Invariant { location, .. }
            | SpecializeError::Unsupported { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Attach a location to an error that does not carry one yet.
    pub fn located(self, fallback: Location) -> Self {
        match self {
            SpecializeError::Unresolvable { location, message } if location.is_empty() => {
                SpecializeError::Unresolvable {
                    location: fallback,
                    message,
                }
            }
            SpecializeError::Invariant { location, message } if location.is_empty() => {
                SpecializeError::Invariant {
                    location: fallback,
                    message,
                }
            }
            SpecializeError::Unsupported { location, message } if location.is_empty() => {
                SpecializeError::Unsupported {
                    location: fallback,
                    message,
                }
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpecializeError>;

/// Errors raised while executing a generated program.
#[derive(Debug, Error)]
pub enum ExecError {
    /// A `throw` in generated code; carries the exception message.
    #[error("uncaught exception: {0}")]
    Thrown(String),

    #[error("null dereference at {0}")]
    NullPointer(Location),

    #[error("index {index} out of bounds for length {length} at {location}")]
    IndexOutOfBounds {
        location: Location,
        index: i64,
        length: usize,
    },

    #[error("cannot cast {from} to {to} at {location}")]
    ClassCast {
        location: Location,
        from: String,
        to: String,
    },

    #[error("arithmetic error at {location}: {message}")]
    Arithmetic { location: Location, message: String },

    #[error("type mismatch at {location}: {message}")]
    Type { location: Location, message: String },

    #[error("no method `{class}.{method}`")]
    NoSuchMethod { class: String, method: String },

    #[error("native `{class}.{method}` is not available to generated programs")]
    UnsupportedNative { class: String, method: String },

    #[error("call depth exceeds {0}")]
    StackOverflow(usize),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("IR error: {0}")]
    Ir(#[from] IrError),

    #[error("execution cancelled by the watchdog")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let location = Location::method("generated.top", "fire")
            .with_component(".top")
            .at(4);
        assert_eq!(
            location.to_string(),
            "component `.top`, method `generated.top.fire` #4"
        );
        assert_eq!(Location::none().to_string(), "<unknown>");
    }

    #[test]
    fn test_located_fills_only_empty_locations() {
        let err = SpecializeError::unresolvable(Location::none(), "channel")
            .located(Location::component(".top.a"));
        assert_eq!(err.location(), Some(&Location::component(".top.a")));

        let err = SpecializeError::invariant(Location::component(".top.b"), "dup")
            .located(Location::component(".top.a"));
        assert_eq!(err.location(), Some(&Location::component(".top.b")));
    }
}
