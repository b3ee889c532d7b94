//! SG-005: Template generation: dispatch to resource renderers.
//!
//! Each declared resource renders to one or more CloudFormation resources
//! (a role with inline statements also yields its default policy; a function
//! without a role yields a default service role) and at most one output.

use super::assets::AssetSource;
use super::resolver;
use super::types::{CfnOutput, CfnResource, Policy, Resource};
use crate::resources;
use indexmap::IndexMap;
use serde_json::{json, Value};

/// Everything a renderer needs besides the resource itself.
pub struct RenderContext<'a> {
    /// Parent stack name, used as the tag key
    pub parent: &'a str,
    /// Nested stack name, the first segment of every construct path
    pub nested: &'a str,
    pub policy: &'a Policy,
    /// Resolved resources of the nested stack
    pub resources: &'a IndexMap<String, Resource>,
    /// Assets keyed by `<nested>/<resource>` path
    pub assets: &'a IndexMap<String, AssetSource>,
}

impl RenderContext<'_> {
    /// Logical id of a construct inside this nested stack.
    pub fn logical_id(&self, construct: &str) -> String {
        resolver::logical_id(&[self.nested, construct])
    }

    /// `<nested>/<resource>` path.
    pub fn path(&self, resource_id: &str) -> String {
        format!("{}/{}", self.nested, resource_id)
    }

    /// Tag list for a resource, or None when tagging is off.
    pub fn tags(&self, resource_id: &str) -> Option<Value> {
        self.policy
            .tags
            .then(|| json!([{ "Key": self.parent, "Value": resource_id }]))
    }

    /// S3 code location of the resource's staged asset.
    pub fn code_location(&self, resource_id: &str) -> Result<Value, String> {
        let path = self.path(resource_id);
        let asset = self
            .assets
            .get(&path)
            .ok_or_else(|| format!("no asset staged for '{}'", path))?;
        Ok(json!({
            "S3Bucket": cfn_string(&self.policy.asset_bucket),
            "S3Key": asset.object_key(),
        }))
    }
}

/// Render a string, wrapping it in `Fn::Sub` when it carries `${...}` references.
///
/// Literal `${` text arrives escaped as `${!` (see [`resolver::escape_literal`]).
/// Inside `Fn::Sub` CloudFormation unescapes it; a plain string is unescaped here.
pub fn cfn_string(s: &str) -> Value {
    if has_substitution(s) {
        json!({ "Fn::Sub": s })
    } else {
        Value::String(s.replace("${!", "${"))
    }
}

/// True when the string holds at least one unescaped `${...}` reference.
pub fn has_substitution(s: &str) -> bool {
    s.match_indices("${")
        .any(|(i, _)| !s[i + 2..].starts_with('!'))
}

/// Render a list as a single value when it has one element (IAM convention).
pub fn one_or_many(items: &[String]) -> Value {
    match items {
        [single] => cfn_string(single),
        many => Value::Array(many.iter().map(|s| cfn_string(s)).collect()),
    }
}

/// Render the CloudFormation resources for one declared resource.
pub fn render_resource(
    resource_id: &str,
    resource: &Resource,
    ctx: &RenderContext,
) -> Result<Vec<(String, CfnResource)>, String> {
    match resource {
        Resource::Role(role) => Ok(resources::role::render(resource_id, role, ctx)),
        Resource::Layer(layer) => Ok(vec![resources::layer::render(resource_id, layer, ctx)?]),
        Resource::Function(function) => resources::function::render(resource_id, function, ctx),
    }
}

/// Render the output binding for a resource that declares one.
pub fn render_output(
    resource_id: &str,
    resource: &Resource,
    ctx: &RenderContext,
) -> Option<(String, CfnOutput)> {
    let name = resource.output()?;
    let value = match resource {
        Resource::Role(_) => return None,
        Resource::Layer(_) => resources::layer::arn(resource_id, ctx),
        Resource::Function(_) => resources::function::arn(resource_id, ctx),
    };
    Some((
        name.to_string(),
        CfnOutput {
            value,
            description: None,
        },
    ))
}
