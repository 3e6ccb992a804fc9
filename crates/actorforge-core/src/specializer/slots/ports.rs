use super::materialize;
use crate::errors::Result;
use crate::specializer::{Context, Pass};
use tracing::info;

/// `getPort(name)` becomes a read of the port's field.
pub struct PortSlotPass;

impl Pass for PortSlotPass {
    fn name(&self) -> &'static str {
        "port-slots"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let replaced = materialize(ctx, &["getPort"])?;
        info!("Materialized {} port lookups", replaced);
        Ok(replaced > 0)
    }
}
