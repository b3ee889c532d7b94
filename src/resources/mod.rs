//! Resource renderers: one CloudFormation shape per declared resource type.
//!
//! Each renderer produces the template resources for its declaration and,
//! where the type publishes one, the value bound to its output.

pub mod function;
pub mod layer;
pub mod role;
pub mod stack;
