//! SG-007: Execution role renderer.

use crate::core::codegen::{cfn_string, has_substitution, one_or_many, RenderContext};
use crate::core::types::{CfnResource, PolicyStatement, RoleSpec};
use serde_json::{json, Value};

/// Managed policy attached to synthesized default roles.
pub const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";

const POLICY_VERSION: &str = "2012-10-17";

/// Construct path of a role's inline default policy.
pub fn default_policy_construct(role_id: &str) -> String {
    format!("{}/DefaultPolicy", role_id)
}

/// Render a role, plus its default policy when it carries inline statements.
pub fn render(role_id: &str, role: &RoleSpec, ctx: &RenderContext) -> Vec<(String, CfnResource)> {
    let logical = ctx.logical_id(role_id);
    let mut props = json!({
        "AssumeRolePolicyDocument": assume_role_policy(&role.assumed_by),
    });
    if !role.managed_policies.is_empty() {
        props["ManagedPolicyArns"] = Value::Array(
            role.managed_policies
                .iter()
                .map(|name| managed_policy_arn(name))
                .collect(),
        );
    }
    if let Some(ref description) = role.description {
        props["Description"] = cfn_string(description);
    }
    if let Some(tags) = ctx.tags(role_id) {
        props["Tags"] = tags;
    }

    let mut out = vec![(
        logical.clone(),
        CfnResource {
            resource_type: "AWS::IAM::Role".to_string(),
            properties: props,
            depends_on: vec![],
            metadata: Some(json!({ "stackgen:path": ctx.path(role_id) })),
        },
    )];

    if !role.statements.is_empty() {
        let policy_logical = ctx.logical_id(&default_policy_construct(role_id));
        out.push((
            policy_logical.clone(),
            CfnResource {
                resource_type: "AWS::IAM::Policy".to_string(),
                properties: json!({
                    "PolicyDocument": {
                        "Statement": role.statements.iter().map(render_statement).collect::<Vec<_>>(),
                        "Version": POLICY_VERSION,
                    },
                    "PolicyName": policy_logical,
                    "Roles": [{ "Ref": logical }],
                }),
                depends_on: vec![],
                metadata: Some(json!({ "stackgen:path": ctx.path(&default_policy_construct(role_id)) })),
            },
        ));
    }
    out
}

/// Render the default service role for a function that names none.
pub fn render_default(function_id: &str, ctx: &RenderContext) -> (String, CfnResource) {
    let construct = format!("{}/ServiceRole", function_id);
    let mut props = json!({
        "AssumeRolePolicyDocument": assume_role_policy("lambda.amazonaws.com"),
        "ManagedPolicyArns": [managed_policy_arn(BASIC_EXECUTION_POLICY)],
    });
    if let Some(tags) = ctx.tags(function_id) {
        props["Tags"] = tags;
    }
    (
        ctx.logical_id(&construct),
        CfnResource {
            resource_type: "AWS::IAM::Role".to_string(),
            properties: props,
            depends_on: vec![],
            metadata: Some(json!({ "stackgen:path": ctx.path(&construct) })),
        },
    )
}

fn assume_role_policy(principal: &str) -> Value {
    json!({
        "Statement": [{
            "Action": "sts:AssumeRole",
            "Effect": "Allow",
            "Principal": { "Service": cfn_string(principal) },
        }],
        "Version": POLICY_VERSION,
    })
}

/// Partition-aware ARN of an AWS managed policy.
pub fn managed_policy_arn(name: &str) -> Value {
    if has_substitution(name) {
        return json!({ "Fn::Sub": format!("arn:${{AWS::Partition}}:iam::aws:policy/{}", name) });
    }
    json!({
        "Fn::Join": ["", ["arn:", { "Ref": "AWS::Partition" }, ":iam::aws:policy/", cfn_string(name)]]
    })
}

fn render_statement(stmt: &PolicyStatement) -> Value {
    json!({
        "Action": one_or_many(&stmt.actions),
        "Effect": stmt.effect.to_string(),
        "Resource": one_or_many(&stmt.resources),
    })
}
