//! Core synthesis logic: types, parsing, resolution, rendering, planning, state.

pub mod assets;
pub mod codegen;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod synth;
pub mod types;
