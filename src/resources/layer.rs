//! SG-008: Code layer renderer.

use crate::core::codegen::{cfn_string, RenderContext};
use crate::core::types::{CfnResource, LayerSpec};
use serde_json::{json, Value};

/// Render a layer version. Layer versions take no tags.
pub fn render(
    layer_id: &str,
    layer: &LayerSpec,
    ctx: &RenderContext,
) -> Result<(String, CfnResource), String> {
    let mut props = json!({ "Content": ctx.code_location(layer_id)? });
    if !layer.compatible_runtimes.is_empty() {
        props["CompatibleRuntimes"] = json!(layer.compatible_runtimes);
    }
    if let Some(ref description) = layer.description {
        props["Description"] = cfn_string(description);
    }
    if let Some(ref name) = layer.layer_name {
        props["LayerName"] = cfn_string(name);
    }
    Ok((
        ctx.logical_id(layer_id),
        CfnResource {
            resource_type: "AWS::Lambda::LayerVersion".to_string(),
            properties: props,
            depends_on: vec![],
            metadata: Some(json!({ "stackgen:path": ctx.path(layer_id) })),
        },
    ))
}

/// Layer version ARN (`Ref` of a layer version).
pub fn arn(layer_id: &str, ctx: &RenderContext) -> Value {
    json!({ "Ref": ctx.logical_id(layer_id) })
}
