//! SG-010: Nested stack resource in the parent template.

use crate::core::codegen::cfn_string;
use crate::core::resolver;
use crate::core::types::{yaml_value_to_string, CfnResource, Policy};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

/// Logical id of a nested stack inside its parent.
pub fn logical_id(parent: &str, nested: &str) -> String {
    resolver::logical_id(&[parent, nested])
}

/// URL the deployment engine fetches the nested template from.
pub fn template_url(bucket: &str, template_key: &str) -> Value {
    json!({
        "Fn::Sub": format!("https://s3.${{AWS::Region}}.${{AWS::URLSuffix}}/{}/{}", bucket, template_key)
    })
}

/// Render the `AWS::CloudFormation::Stack` instantiating a nested template.
/// Props are passed as template parameters.
pub fn render(
    parent: &str,
    nested: &str,
    template_key: &str,
    props: &IndexMap<String, serde_yaml_ng::Value>,
    policy: &Policy,
) -> (String, CfnResource) {
    let mut properties = json!({
        "TemplateURL": template_url(&policy.asset_bucket, template_key),
    });
    if !props.is_empty() {
        let parameters: Map<String, Value> = props
            .iter()
            .map(|(k, v)| (k.clone(), cfn_string(&yaml_value_to_string(v))))
            .collect();
        properties["Parameters"] = Value::Object(parameters);
    }
    if policy.tags {
        properties["Tags"] = json!([{ "Key": parent, "Value": nested }]);
    }
    (
        logical_id(parent, nested),
        CfnResource {
            resource_type: "AWS::CloudFormation::Stack".to_string(),
            properties,
            depends_on: vec![],
            metadata: Some(json!({ "stackgen:path": format!("{}/{}", parent, nested) })),
        },
    )
}
