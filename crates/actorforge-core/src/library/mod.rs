//! The generic runtime the pipeline specializes away, expressed as IR.

mod actors;
mod framework;
pub mod tokens;

pub use actors::{actor_template, ActorTemplate, ACTOR_CLASSES};
pub use framework::{
    is_immutable_class, is_token_class, LIFECYCLE_CLASSES, ROOT_CLASSES, STRIPPED_TYPES,
    TOKEN_CLASSES,
};

use crate::ir::{IrError, Scene};

/// Register the framework and actor classes in `scene`.
pub fn install(scene: &mut Scene) -> Result<(), IrError> {
    framework::install(scene)?;
    actors::install(scene)
}

/// A scene holding only the library.
pub fn library_scene() -> Result<Scene, IrError> {
    let mut scene = Scene::new();
    install(&mut scene)?;
    Ok(scene)
}
