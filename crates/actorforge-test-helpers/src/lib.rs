//! Test utilities for ActorForge

pub mod compile;
pub mod fixtures;

pub use compile::{
    config_with_iterations, load_model, run_model, specialize_collecting, specialize_model,
};
