//! Built-in agent types.

pub mod constant;
pub mod decision;
pub mod gentext;

use crate::registry::Registry;
use plait_core::error::Result;

/// Register every built-in agent type into `registry`.
pub fn register_builtins(registry: &Registry) -> Result<()> {
    gentext::register(registry)?;
    decision::register(registry)?;
    constant::register(registry)?;
    Ok(())
}
