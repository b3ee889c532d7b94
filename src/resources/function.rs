//! SG-009: Compute function renderer.
//!
//! Environment keys are always emitted, even when their resolved value is
//! empty, so a handler sees every variable it was declared with.

use super::role;
use crate::core::codegen::{cfn_string, RenderContext};
use crate::core::types::{CfnResource, FunctionSpec, Resource};
use serde_json::{json, Map, Value};

/// Render a function, plus its default service role when it names none.
pub fn render(
    function_id: &str,
    function: &FunctionSpec,
    ctx: &RenderContext,
) -> Result<Vec<(String, CfnResource)>, String> {
    let mut out = Vec::new();
    let mut depends_on = Vec::new();

    let role_logical = match function.role {
        Some(ref role_id) => {
            let Some(Resource::Role(spec)) = ctx.resources.get(role_id) else {
                return Err(format!(
                    "function '{}' references unknown role '{}'",
                    function_id, role_id
                ));
            };
            let logical = ctx.logical_id(role_id);
            if !spec.statements.is_empty() {
                depends_on.push(ctx.logical_id(&role::default_policy_construct(role_id)));
            }
            logical
        }
        None => {
            let (logical, resource) = role::render_default(function_id, ctx);
            out.push((logical.clone(), resource));
            logical
        }
    };
    depends_on.push(role_logical.clone());

    let mut props = json!({
        "Code": ctx.code_location(function_id)?,
        "Handler": cfn_string(&function.handler),
        "Role": { "Fn::GetAtt": [role_logical, "Arn"] },
        "Runtime": function.runtime,
    });

    if !function.environment.is_empty() {
        let variables: Map<String, Value> = function
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), cfn_string(v)))
            .collect();
        props["Environment"] = json!({ "Variables": variables });
    }

    if !function.layers.is_empty() {
        let mut layers = Vec::with_capacity(function.layers.len());
        for layer_id in &function.layers {
            match ctx.resources.get(layer_id) {
                Some(Resource::Layer(_)) => {
                    layers.push(super::layer::arn(layer_id, ctx));
                }
                _ => {
                    return Err(format!(
                        "function '{}' references unknown layer '{}'",
                        function_id, layer_id
                    ))
                }
            }
        }
        props["Layers"] = Value::Array(layers);
    }

    if let Some(timeout) = function.timeout {
        props["Timeout"] = json!(timeout);
    }
    if let Some(memory) = function.memory_size {
        props["MemorySize"] = json!(memory);
    }
    if let Some(ref description) = function.description {
        props["Description"] = cfn_string(description);
    }
    if let Some(tags) = ctx.tags(function_id) {
        props["Tags"] = tags;
    }

    depends_on.extend(function.depends_on.iter().map(|d| ctx.logical_id(d)));
    depends_on.sort();
    depends_on.dedup();

    out.push((
        ctx.logical_id(function_id),
        CfnResource {
            resource_type: "AWS::Lambda::Function".to_string(),
            properties: props,
            depends_on,
            metadata: Some(json!({ "stackgen:path": ctx.path(function_id) })),
        },
    ));
    Ok(out)
}

/// Function ARN (`Fn::GetAtt [fn, Arn]`).
pub fn arn(function_id: &str, ctx: &RenderContext) -> Value {
    json!({ "Fn::GetAtt": [ctx.logical_id(function_id), "Arn"] })
}
