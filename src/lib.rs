//! stackgen: declarative nested stacks for Lambda functions, layers and roles.
//!
//! A YAML definition is resolved against a one-time environment snapshot and
//! synthesized into CloudFormation templates and content-addressed assets.
//! BLAKE3 lock files and a provenance event log track every synth.

pub mod cli;
pub mod core;
pub mod resources;
pub mod tripwire;
