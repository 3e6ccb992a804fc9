pub mod config;
pub mod data;
pub mod di;
pub mod diagnostics;
pub mod errors;
pub mod expr;
pub mod interp;
pub mod ir;
pub mod library;
pub mod model;
pub mod specializer;
pub mod watchdog;

pub use config::{CliOverrides, CodegenMode, ConstantPolicy, SpecializerConfig};
pub use data::{Token, ValueType};
pub use di::Container;
pub use diagnostics::{
    CollectingDiagnosticHandler, ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler,
    DiagnosticLevel,
};
pub use errors::{ExecError, Location, SpecializeError};
pub use interp::{run_main, ExecutionTrace, Interpreter};
pub use model::{Model, ModelDescription};
pub use specializer::{
    residual_framework_references, specialize, specialize_with, Pass, Pipeline, Specialized,
};
pub use watchdog::{CancelFlag, Watchdog};
