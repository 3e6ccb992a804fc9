//! The specialization pipeline.
//!
//! A model is specialized by running a fixed, ordered list of passes over
//! one [`Context`]. Each pass rewrites the scene in place and reports
//! whether it changed anything; the first error aborts the whole run.

mod calls;
mod composite;
mod connectivity;
mod constants;
mod context;
mod dead_code;
mod expression;
mod fsm;
mod harness;
mod identity;
mod instance_class;
mod parameters;
mod resolve;
mod schedule;
mod slots;
mod token_inliner;
mod types;
mod unroll;

pub use calls::CallInlinePass;
pub use composite::{CompositePass, INSTANCE_FIELD};
pub use connectivity::ConnectivityPass;
pub use constants::ConstantAttributes;
pub use context::{BufferKey, Context};
pub use dead_code::DeadCodePass;
pub use expression::ExpressionPass;
pub use harness::{HarnessPass, MAIN_METHOD};
pub use identity::{residual_framework_references, IdentityPass};
pub use instance_class::InstanceClassPass;
pub use resolve::{ModelRef, Resolver};
pub use schedule::schedule;
pub use slots::{AttributeSlotPass, ComponentSlotPass, PortSlotPass};
pub use token_inliner::TokenTypePass;
pub use unroll::UnrollPass;

use crate::config::SpecializerConfig;
use crate::di::Container;
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{Body, Cfg, Printer, Scene};
use crate::library;
use crate::model::Model;
use crate::watchdog::CancelFlag;
use std::sync::Arc;
use tracing::{debug, info};

/// One transformation of the scene.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Whether the pass runs under `config`.
    fn applies_to(&self, _config: &SpecializerConfig) -> bool {
        true
    }

    /// Returns true when the scene changed.
    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool>;
}

pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
    cancel: Option<CancelFlag>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl Pipeline {
    pub fn empty() -> Self {
        Pipeline {
            passes: Vec::new(),
            cancel: None,
        }
    }

    /// The full pass sequence in dependency order.
    pub fn standard() -> Self {
        let mut pipeline = Pipeline::empty();
        pipeline
            .add(InstanceClassPass)
            .add(CompositePass)
            .add(AttributeSlotPass)
            .add(PortSlotPass)
            .add(ComponentSlotPass)
            .add(ExpressionPass)
            .add(TokenTypePass)
            .add(ConnectivityPass)
            .add(CallInlinePass)
            .add(IdentityPass)
            .add(DeadCodePass)
            .add(UnrollPass)
            .add(DeadCodePass)
            .add(HarnessPass);
        pipeline
    }

    pub fn add(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Stop before the next pass once `flag` is raised.
    pub fn cancel_on(&mut self, flag: CancelFlag) -> &mut Self {
        self.cancel = Some(flag);
        self
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        for pass in &mut self.passes {
            if self.cancel.as_ref().map(CancelFlag::is_set).unwrap_or(false) {
                return Err(SpecializeError::Cancelled);
            }
            if !pass.applies_to(&ctx.config) {
                debug!("Skipping pass {}", pass.name());
                continue;
            }
            debug!("Running pass {}", pass.name());
            let changed = pass.run(ctx)?;
            debug!("Pass {} finished (changed: {})", pass.name(), changed);
            if ctx.config.debug {
                check_bodies(&ctx.scene, pass.name())?;
            }
        }
        Ok(())
    }
}

/// Every application body still has a well-formed control-flow graph.
fn check_bodies(scene: &Scene, pass: &str) -> Result<()> {
    for (class, method) in scene.application_methods() {
        let Some(body) = scene.method(&class, &method).and_then(|m| m.body.as_ref()) else {
            continue;
        };
        Cfg::build(body).map_err(|e| {
            SpecializeError::invariant(
                Location::method(class.as_str(), method.as_str()),
                format!("after {}: {}", pass, e),
            )
        })?;
    }
    Ok(())
}

/// Output of a successful run.
#[derive(Debug)]
pub struct Specialized {
    pub scene: Scene,
    pub top_class: String,
    pub main_class: String,
}

impl Specialized {
    /// The generated classes as text.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for class in self.scene.application_classes() {
            if let Some(class) = self.scene.class(&class) {
                out.push_str(&Printer::new().class_to_string(class));
                out.push('\n');
            }
        }
        out
    }
}

/// Specialize `model` with the standard pipeline. Failures are reported to
/// the container's diagnostic handler before being returned.
pub fn specialize(model: &Model, container: &Container) -> Result<Specialized> {
    let mut pipeline = Pipeline::standard();
    if let Some(flag) = container.cancel_flag() {
        pipeline.cancel_on(flag.clone());
    }
    let result = specialize_with(model, container, &mut pipeline);
    if let Err(err) = &result {
        let location = err.location().cloned().unwrap_or_else(Location::none);
        container
            .diagnostic_handler()
            .error(location, &err.to_string());
    }
    result
}

pub fn specialize_with(
    model: &Model,
    container: &Container,
    pipeline: &mut Pipeline,
) -> Result<Specialized> {
    container.config().validate()?;
    let scene = library::library_scene()?;
    let mut ctx = Context::new(
        model,
        scene,
        Arc::clone(container.config()),
        Arc::clone(container.parser()),
        Arc::clone(container.diagnostic_handler()),
    )?;
    info!(
        "Specializing `{}` ({} passes, {:?} mode)",
        model.component(model.top()).name,
        pipeline.pass_count(),
        ctx.config.mode
    );
    pipeline.run(&mut ctx)?;

    let top_class = ctx.top_class().to_string();
    let main_class = ctx.main_class().map(str::to_string).ok_or_else(|| {
        SpecializeError::invariant(Location::none(), "no harness class was generated")
    })?;
    Ok(Specialized {
        scene: ctx.scene,
        top_class,
        main_class,
    })
}

/// Run `f` over every application body, detaching each while it is edited.
/// Returns how many bodies `f` reported as changed.
pub(crate) fn rewrite_bodies<F>(ctx: &mut Context<'_>, mut f: F) -> Result<usize>
where
    F: FnMut(&Context<'_>, &str, &str, &mut Body) -> Result<bool>,
{
    let mut changed = 0;
    for (class, method) in ctx.scene.application_methods() {
        let mut body = ctx.scene.take_body(&class, &method)?;
        let result = f(ctx, &class, &method, &mut body);
        ctx.scene.put_body(&class, &method, body)?;
        if result.map_err(|e| e.located(Location::method(class.as_str(), method.as_str())))? {
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Context;
    use crate::config::SpecializerConfig;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::expr::DefaultExpressionParser;
    use crate::library;
    use crate::model::{Model, ModelDescription};
    use std::sync::Arc;

    pub fn context_for(model: &Model) -> Context<'_> {
        context_with_config(model, SpecializerConfig::default())
    }

    pub fn context_with_config(model: &Model, config: SpecializerConfig) -> Context<'_> {
        Context::new(
            model,
            library::library_scene().unwrap(),
            Arc::new(config),
            Arc::new(DefaultExpressionParser),
            Arc::new(CollectingDiagnosticHandler::new()),
        )
        .unwrap()
    }

    pub fn model_from_yaml(text: &str) -> Model {
        ModelDescription::from_yaml(text)
            .unwrap()
            .into_model()
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodegenMode;

    #[test]
    fn test_standard_pipeline_order() {
        let pipeline = Pipeline::standard();
        assert_eq!(
            pipeline.pass_names(),
            vec![
                "instance-classes",
                "composites",
                "attribute-slots",
                "port-slots",
                "component-slots",
                "expressions",
                "token-types",
                "connectivity",
                "call-inlining",
                "identity",
                "dead-code",
                "unroll",
                "dead-code",
                "harness",
            ]
        );
    }

    #[test]
    fn test_shallow_mode_skips_deep_passes() {
        let config = SpecializerConfig {
            mode: CodegenMode::Shallow,
            ..SpecializerConfig::default()
        };
        let skipped: Vec<&str> = Pipeline::standard()
            .passes
            .iter()
            .filter(|p| !p.applies_to(&config))
            .map(|p| p.name())
            .collect();
        assert_eq!(skipped, vec!["connectivity", "call-inlining", "identity"]);
    }

    #[test]
    fn test_raised_flag_stops_before_first_pass() {
        let model = test_support::model_from_yaml(indoc::indoc! {"
            name: top
            entities:
              - { kind: atomic, name: sink, class: Discard }
        "});
        let mut ctx = test_support::context_for(&model);
        let flag = CancelFlag::new();
        flag.set();
        let mut pipeline = Pipeline::standard();
        pipeline.cancel_on(flag);
        assert!(matches!(pipeline.run(&mut ctx), Err(SpecializeError::Cancelled)));
        assert!(ctx.scene.application_classes().is_empty());
    }
}
