//! Specialization helpers for integration tests
//!
//! Every helper wires the pipeline through a `Container` with a collecting
//! diagnostic handler, so nothing is printed and reported diagnostics can
//! be inspected.

use actorforge_core::diagnostics::CollectingDiagnosticHandler;
use actorforge_core::expr::DefaultExpressionParser;
use actorforge_core::interp::run_main;
use actorforge_core::{
    specialize, Container, ExecutionTrace, Model, ModelDescription, SpecializeError, Specialized,
    SpecializerConfig,
};
use std::sync::Arc;

/// Build a model from a YAML description
pub fn load_model(yaml: &str) -> Result<Model, String> {
    ModelDescription::from_yaml(yaml)
        .and_then(ModelDescription::into_model)
        .map_err(|e| format!("Model failed to load: {}", e))
}

/// Default configuration with a harness iteration cap
pub fn config_with_iterations(iterations: u64) -> SpecializerConfig {
    SpecializerConfig {
        iterations: Some(iterations),
        ..SpecializerConfig::default()
    }
}

/// Specialize a model, returning the raw result together with the handler
/// the failure (if any) was reported to
pub fn specialize_collecting(
    model: &Model,
    config: SpecializerConfig,
) -> (
    Result<Specialized, SpecializeError>,
    Arc<CollectingDiagnosticHandler>,
) {
    let diagnostics = Arc::new(CollectingDiagnosticHandler::new());
    let container = Container::with_dependencies(
        config,
        diagnostics.clone(),
        Arc::new(DefaultExpressionParser),
    );
    (specialize(model, &container), diagnostics)
}

/// Specialize a YAML model description
///
/// # Returns
/// The specialized program or an error message
pub fn specialize_model(yaml: &str, config: SpecializerConfig) -> Result<Specialized, String> {
    let model = load_model(yaml)?;
    specialize_collecting(&model, config)
        .0
        .map_err(|e| format!("Specialization failed: {}", e))
}

/// Specialize a YAML model description and execute its harness
///
/// # Returns
/// The execution trace or an error message
pub fn run_model(yaml: &str, iterations: u64) -> Result<ExecutionTrace, String> {
    let specialized = specialize_model(yaml, config_with_iterations(iterations))?;
    run_main(&specialized.scene, &specialized.main_class)
        .map_err(|e| format!("Execution failed: {}", e))
}
