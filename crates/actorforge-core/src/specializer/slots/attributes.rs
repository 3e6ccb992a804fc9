use super::materialize;
use crate::errors::Result;
use crate::specializer::{Context, Pass};
use tracing::info;

/// `getAttribute(name)` becomes a read of the attribute's field, following
/// dotted paths and nested attributes.
pub struct AttributeSlotPass;

impl Pass for AttributeSlotPass {
    fn name(&self) -> &'static str {
        "attribute-slots"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let replaced = materialize(ctx, &["getAttribute"])?;
        info!("Materialized {} attribute lookups", replaced);
        Ok(replaced > 0)
    }
}
