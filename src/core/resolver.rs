//! SG-003: Template resolution, environment snapshot, and dependency ordering.
//!
//! Resolves `{{env.NAME}}`, `{{params.key}}`, `{{props.key}}` and
//! `{{stack.name|account|region}}` templates. Builds a DAG per nested stack
//! from `depends_on`, `layers` and `role` edges and computes topological order
//! using Kahn's algorithm with deterministic (alphabetical) tie-breaking.

use super::types::*;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

/// Pseudo-parameter substituted for `{{stack.account}}` without a literal account.
pub const ACCOUNT_PSEUDO: &str = "${AWS::AccountId}";

/// Pseudo-parameter substituted for `{{stack.region}}` without a literal region.
pub const REGION_PSEUDO: &str = "${AWS::Region}";

/// Environment variables captured once per run.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the process environment, then fill gaps from a dotenv file.
    /// Variables already set in the process win over the file.
    pub fn capture(env_file: Option<&Path>) -> Result<Self, String> {
        let mut vars: HashMap<String, String> = std::env::vars().collect();
        if let Some(path) = env_file {
            if path.exists() {
                let iter = dotenvy::from_path_iter(path)
                    .map_err(|e| format!("cannot read env file {}: {}", path.display(), e))?;
                for item in iter {
                    let (key, value) = item
                        .map_err(|e| format!("invalid env file {}: {}", path.display(), e))?;
                    vars.entry(key).or_insert(value);
                }
            } else {
                tracing::debug!(path = %path.display(), "env file not found, skipping");
            }
        }
        Ok(Self { vars })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Everything a template may reference while resolving one nested stack.
pub struct TemplateContext<'a> {
    pub stack_name: &'a str,
    pub env: &'a EnvSnapshot,
    pub params: &'a IndexMap<String, serde_yaml_ng::Value>,
    pub props: &'a IndexMap<String, serde_yaml_ng::Value>,
    pub environment: &'a StackEnvironment,
    pub strict_env: bool,
}

/// Resolve all template variables in a string.
pub fn resolve_template(template: &str, ctx: &TemplateContext) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = if let Some(name) = key.strip_prefix("env.") {
            escape_literal(&resolve_env(name, ctx)?)
        } else if let Some(param_key) = key.strip_prefix("params.") {
            ctx.params
                .get(param_key)
                .map(|v| escape_literal(&yaml_value_to_string(v)))
                .ok_or_else(|| format!("unknown param: {}", param_key))?
        } else if let Some(prop_key) = key.strip_prefix("props.") {
            // Props become nested template parameters, read back through Fn::Sub.
            if !ctx.props.contains_key(prop_key) {
                return Err(format!("unknown prop: {}", prop_key));
            }
            format!("${{{}}}", prop_key)
        } else if let Some(field) = key.strip_prefix("stack.") {
            match field {
                "name" => ctx.stack_name.to_string(),
                "account" => ctx
                    .environment
                    .account
                    .clone()
                    .unwrap_or_else(|| ACCOUNT_PSEUDO.to_string()),
                "region" => ctx
                    .environment
                    .region
                    .clone()
                    .unwrap_or_else(|| REGION_PSEUDO.to_string()),
                _ => return Err(format!("unknown stack field: {}", field)),
            }
        } else {
            return Err(format!("unknown template variable: {}", key));
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Escape `${` in a substituted value so it survives `Fn::Sub` as literal text.
pub fn escape_literal(value: &str) -> String {
    value.replace("${", "${!")
}

fn resolve_env(name: &str, ctx: &TemplateContext) -> Result<String, String> {
    match ctx.env.get(name) {
        Some(v) => Ok(v.to_string()),
        None if ctx.strict_env => Err(format!("environment variable {} is not set", name)),
        None => {
            tracing::warn!(variable = name, "environment variable not set, using empty string");
            Ok(String::new())
        }
    }
}

fn resolve_opt(value: &Option<String>, ctx: &TemplateContext) -> Result<Option<String>, String> {
    value.as_deref().map(|v| resolve_template(v, ctx)).transpose()
}

/// Visit every string field of a resource that may carry templates.
fn visit_template_fields(
    resource: &mut Resource,
    visit: &mut dyn FnMut(&mut String) -> Result<(), String>,
) -> Result<(), String> {
    match resource {
        Resource::Role(r) => {
            visit(&mut r.assumed_by)?;
            for policy in &mut r.managed_policies {
                visit(policy)?;
            }
            if let Some(ref mut description) = r.description {
                visit(description)?;
            }
            for stmt in &mut r.statements {
                for field in stmt.actions.iter_mut().chain(stmt.resources.iter_mut()) {
                    visit(field)?;
                }
            }
        }
        Resource::Layer(l) => {
            visit(&mut l.code)?;
            for field in l.description.iter_mut().chain(l.layer_name.iter_mut()) {
                visit(field)?;
            }
        }
        Resource::Function(f) => {
            visit(&mut f.handler)?;
            visit(&mut f.code)?;
            if let Some(ref mut description) = f.description {
                visit(description)?;
            }
            for value in f.environment.values_mut() {
                visit(value)?;
            }
        }
    }
    Ok(())
}

/// Resolve all templates in a resource's string fields.
pub fn resolve_resource_templates(
    resource: &Resource,
    ctx: &TemplateContext,
) -> Result<Resource, String> {
    let mut resolved = resource.clone();
    visit_template_fields(&mut resolved, &mut |field: &mut String| {
        *field = resolve_template(field, ctx)?;
        Ok(())
    })?;
    Ok(resolved)
}

/// Every `{{env.NAME}}` referenced anywhere in the config, in first-seen order.
pub fn referenced_env_vars(config: &StackConfig) -> Vec<String> {
    fn scan(text: &str, seen: &mut IndexMap<String, ()>) {
        let mut rest = text;
        while let Some(open) = rest.find("{{") {
            let Some(close) = rest[open..].find("}}") else {
                return;
            };
            let key = rest[open + 2..open + close].trim();
            if let Some(name) = key.strip_prefix("env.") {
                seen.insert(name.to_string(), ());
            }
            rest = &rest[open + close + 2..];
        }
    }

    let mut seen = IndexMap::new();
    for field in config.environment.account.iter().chain(&config.environment.region) {
        scan(field, &mut seen);
    }
    for nested in config.stacks.values() {
        for resource in nested.resources.values() {
            let mut copy = resource.clone();
            // scanning never fails
            let _ = visit_template_fields(&mut copy, &mut |field: &mut String| {
                scan(field, &mut seen);
                Ok(())
            });
        }
    }
    seen.into_keys().collect()
}

/// Referenced environment variables absent from the snapshot.
pub fn missing_env_vars(config: &StackConfig, env: &EnvSnapshot) -> Vec<String> {
    referenced_env_vars(config)
        .into_iter()
        .filter(|name| env.get(name).is_none())
        .collect()
}

/// Resolve account/region literals, which may themselves reference env vars.
pub fn resolve_environment(
    config: &StackConfig,
    env: &EnvSnapshot,
) -> Result<StackEnvironment, String> {
    let empty = IndexMap::new();
    let unresolved = StackEnvironment::default();
    let ctx = TemplateContext {
        stack_name: &config.name,
        env,
        params: &config.params,
        props: &empty,
        environment: &unresolved,
        strict_env: config.policy.strict_env,
    };
    let account = resolve_opt(&config.environment.account, &ctx)?;
    let region = resolve_opt(&config.environment.region, &ctx)?;
    Ok(StackEnvironment {
        account: account.filter(|a| !a.is_empty()),
        region: region.filter(|r| !r.is_empty()),
    })
}

/// Build a topological order of a nested stack's resources.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn build_execution_order(nested: &NestedStack) -> Result<Vec<String>, String> {
    let resource_ids: Vec<String> = nested.resources.keys().cloned().collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in &resource_ids {
        in_degree.insert(id.as_str(), 0);
        adjacency.insert(id.as_str(), Vec::new());
    }

    for (id, resource) in &nested.resources {
        let mut seen = HashSet::new();
        for dep in resource.references() {
            if !seen.insert(dep) {
                continue;
            }
            let Some(edges) = adjacency.get_mut(dep) else {
                return Err(format!("resource '{}' depends on unknown '{}'", id, dep));
            };
            edges.push(id.as_str());
            if let Some(degree) = in_degree.get_mut(id.as_str()) {
                *degree += 1;
            }
        }
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != resource_ids.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut cycle_members: Vec<&str> = resource_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !ordered.contains(id))
            .collect();
        cycle_members.sort_unstable();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

/// Derive a stable CloudFormation logical id for a construct path.
///
/// Alphanumeric characters of the last path segment, followed by the first
/// eight uppercase hex digits of the BLAKE3 hash of the full path.
pub fn logical_id(path: &[&str]) -> String {
    let full = path.join("/");
    let base: String = path
        .last()
        .map(|segment| segment.chars().filter(char::is_ascii_alphanumeric).collect())
        .unwrap_or_default();
    let digest = blake3::hash(full.as_bytes()).to_hex();
    format!("{}{}", base, digest[..8].to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ctx<'a>(
        env: &'a EnvSnapshot,
        params: &'a IndexMap<String, serde_yaml_ng::Value>,
        props: &'a IndexMap<String, serde_yaml_ng::Value>,
        environment: &'a StackEnvironment,
    ) -> TemplateContext<'a> {
        TemplateContext {
            stack_name: "MainStack",
            env,
            params,
            props,
            environment,
            strict_env: false,
        }
    }

    fn nested(yaml: &str) -> NestedStack {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn test_sg003_resolve_env() {
        let env = EnvSnapshot::from_pairs([("LOG_LEVEL", "DEBUG")]);
        let (params, props, environment) = Default::default();
        let c = ctx(&env, &params, &props, &environment);
        assert_eq!(resolve_template("level={{env.LOG_LEVEL}}", &c).unwrap(), "level=DEBUG");
    }

    #[test]
    fn test_sg003_missing_env_is_empty() {
        let env = EnvSnapshot::default();
        let (params, props, environment) = Default::default();
        let c = ctx(&env, &params, &props, &environment);
        assert_eq!(resolve_template("[{{ env.CLOUDFRONT_DOMAIN }}]", &c).unwrap(), "[]");
    }

    #[test]
    fn test_sg003_missing_env_strict() {
        let env = EnvSnapshot::default();
        let (params, props, environment) = Default::default();
        let mut c = ctx(&env, &params, &props, &environment);
        c.strict_env = true;
        let err = resolve_template("{{env.CLOUDFRONT_DOMAIN}}", &c).unwrap_err();
        assert!(err.contains("CLOUDFRONT_DOMAIN is not set"));
    }

    #[test]
    fn test_sg003_resolve_params() {
        let env = EnvSnapshot::default();
        let mut params = IndexMap::new();
        params.insert(
            "prefix".to_string(),
            serde_yaml_ng::Value::String("Choiflix".to_string()),
        );
        let (props, environment) = Default::default();
        let c = ctx(&env, &params, &props, &environment);
        assert_eq!(
            resolve_template("{{params.prefix}}-Python-Layer", &c).unwrap(),
            "Choiflix-Python-Layer"
        );
        assert!(resolve_template("{{params.missing}}", &c)
            .unwrap_err()
            .contains("unknown param"));
    }

    #[test]
    fn test_sg003_resolve_props_become_sub_refs() {
        let env = EnvSnapshot::default();
        let mut props = IndexMap::new();
        props.insert("Stage".to_string(), serde_yaml_ng::Value::String("dev".into()));
        let (params, environment) = Default::default();
        let c = ctx(&env, &params, &props, &environment);
        assert_eq!(resolve_template("/{{props.Stage}}/x", &c).unwrap(), "/${Stage}/x");
        assert!(resolve_template("{{props.Nope}}", &c).is_err());
    }

    #[test]
    fn test_sg003_stack_account_pseudo_and_literal() {
        let env = EnvSnapshot::default();
        let (params, props) = Default::default();
        let pseudo = StackEnvironment::default();
        let c = ctx(&env, &params, &props, &pseudo);
        assert_eq!(resolve_template("{{stack.account}}", &c).unwrap(), ACCOUNT_PSEUDO);
        assert_eq!(resolve_template("{{stack.region}}", &c).unwrap(), REGION_PSEUDO);
        assert_eq!(resolve_template("{{stack.name}}", &c).unwrap(), "MainStack");

        let literal = StackEnvironment {
            account: Some("123456789012".to_string()),
            region: Some("eu-west-2".to_string()),
        };
        let c = ctx(&env, &params, &props, &literal);
        assert_eq!(resolve_template("{{stack.account}}", &c).unwrap(), "123456789012");
        assert!(resolve_template("{{stack.owner}}", &c).is_err());
    }

    #[test]
    fn test_sg003_table_arn_interpolation() {
        let env = EnvSnapshot::from_pairs([
            ("DEFAULT_AWS_REGION", "eu-west-2"),
            ("METADATA_TABLE_NAME", "media-metadata"),
        ]);
        let (params, props) = Default::default();
        let environment = StackEnvironment {
            account: Some("123456789012".to_string()),
            region: None,
        };
        let c = ctx(&env, &params, &props, &environment);
        let arn = resolve_template(
            "arn:aws:dynamodb:{{env.DEFAULT_AWS_REGION}}:{{stack.account}}:table/{{env.METADATA_TABLE_NAME}}",
            &c,
        )
        .unwrap();
        assert_eq!(arn, "arn:aws:dynamodb:eu-west-2:123456789012:table/media-metadata");
    }

    #[test]
    fn test_sg003_unclosed_and_unknown() {
        let env = EnvSnapshot::default();
        let (params, props, environment) = Default::default();
        let c = ctx(&env, &params, &props, &environment);
        assert!(resolve_template("{{env.X", &c).unwrap_err().contains("unclosed"));
        assert!(resolve_template("{{what}}", &c).unwrap_err().contains("unknown template"));
    }

    #[test]
    fn test_sg003_resolve_function_environment() {
        let env = EnvSnapshot::from_pairs([("LOG_LEVEL", "INFO")]);
        let (params, props, environment) = Default::default();
        let c = ctx(&env, &params, &props, &environment);
        let resource: Resource = serde_yaml_ng::from_str(
            r#"
type: function
runtime: python3.12
handler: main.handler
code: fn
environment:
  LOG_LEVEL: "{{env.LOG_LEVEL}}"
  CLOUDFRONT_DOMAIN: "{{env.CLOUDFRONT_DOMAIN}}"
"#,
        )
        .unwrap();
        let Resource::Function(f) = resolve_resource_templates(&resource, &c).unwrap() else {
            panic!("expected function");
        };
        assert_eq!(f.environment["LOG_LEVEL"], "INFO");
        assert_eq!(f.environment["CLOUDFRONT_DOMAIN"], "");
    }

    #[test]
    fn test_sg003_capture_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "STACKGEN_TEST_ONLY_IN_FILE=from-file\n").unwrap();
        let env = EnvSnapshot::capture(Some(&path)).unwrap();
        assert_eq!(env.get("STACKGEN_TEST_ONLY_IN_FILE"), Some("from-file"));
    }

    #[test]
    fn test_sg003_capture_missing_env_file() {
        let env = EnvSnapshot::capture(Some(Path::new("/nonexistent/.env"))).unwrap();
        assert!(env.get("STACKGEN_TEST_ONLY_IN_FILE").is_none());
    }

    #[test]
    fn test_sg003_referenced_and_missing_env() {
        let config: StackConfig = serde_yaml_ng::from_str(
            r#"
version: "1.0"
name: MainStack
environment:
  region: "{{env.DEFAULT_AWS_REGION}}"
stacks:
  LambdaStack:
    resources:
      get_medias:
        type: function
        runtime: python3.12
        handler: main.handler
        code: fn
        environment:
          METADATA_DDB_TABLE_NAME: "{{env.METADATA_DDB_TABLE_NAME}}"
          LOG_LEVEL: "{{env.LOG_LEVEL}}"
"#,
        )
        .unwrap();
        assert_eq!(
            referenced_env_vars(&config),
            vec!["DEFAULT_AWS_REGION", "METADATA_DDB_TABLE_NAME", "LOG_LEVEL"]
        );
        let env = EnvSnapshot::from_pairs([("LOG_LEVEL", "INFO")]);
        assert_eq!(
            missing_env_vars(&config, &env),
            vec!["DEFAULT_AWS_REGION", "METADATA_DDB_TABLE_NAME"]
        );
        let resolved = resolve_environment(&config, &env).unwrap();
        assert!(resolved.region.is_none(), "empty region falls back to the pseudo-parameter");
    }

    #[test]
    fn test_sg003_substituted_values_are_escaped() {
        let env = EnvSnapshot::from_pairs([("LOG_LEVEL", "${HOME}")]);
        let mut params = IndexMap::new();
        params.insert(
            "suffix".to_string(),
            serde_yaml_ng::Value::String("${x}".to_string()),
        );
        let (props, environment) = Default::default();
        let c = ctx(&env, &params, &props, &environment);
        assert_eq!(resolve_template("{{env.LOG_LEVEL}}", &c).unwrap(), "${!HOME}");
        assert_eq!(resolve_template("a{{params.suffix}}", &c).unwrap(), "a${!x}");
        assert_eq!(
            resolve_template("{{env.LOG_LEVEL}}@{{stack.region}}", &c).unwrap(),
            "${!HOME}@${AWS::Region}"
        );
    }

    #[test]
    fn test_sg003_env_vars_in_every_resolved_field() {
        let config: StackConfig = serde_yaml_ng::from_str(
            r#"
version: "1.0"
name: MainStack
stacks:
  LambdaStack:
    resources:
      ExecRole:
        type: role
        assumed_by: "{{env.PRINCIPAL}}"
        managed_policies: ["{{env.MANAGED_POLICY}}"]
        description: "role for {{env.ROLE_OWNER}}"
      get_medias:
        type: function
        runtime: python3.12
        handler: main.handler
        code: fn
        description: "{{env.FN_DESCRIPTION}}"
"#,
        )
        .unwrap();
        assert_eq!(
            referenced_env_vars(&config),
            vec!["PRINCIPAL", "MANAGED_POLICY", "ROLE_OWNER", "FN_DESCRIPTION"]
        );
        let env = EnvSnapshot::from_pairs([("MANAGED_POLICY", "ReadOnlyAccess")]);
        assert_eq!(
            missing_env_vars(&config, &env),
            vec!["PRINCIPAL", "ROLE_OWNER", "FN_DESCRIPTION"]
        );
    }

    #[test]
    fn test_sg003_topo_layers_before_functions() {
        let n = nested(
            r#"
resources:
  get_medias:
    type: function
    runtime: python3.12
    handler: main.handler
    code: a
    layers: [PythonLayer]
    role: ExecRole
  PythonLayer:
    type: layer
    code: layer.zip
  ExecRole:
    type: role
"#,
        );
        let order = build_execution_order(&n).unwrap();
        assert_eq!(order, vec!["ExecRole", "PythonLayer", "get_medias"]);
    }

    #[test]
    fn test_sg003_topo_alphabetical_ties() {
        let n = nested(
            r#"
resources:
  beta:
    type: layer
    code: b.zip
  alpha:
    type: layer
    code: a.zip
"#,
        );
        assert_eq!(build_execution_order(&n).unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_sg003_topo_cycle() {
        let n = nested(
            r#"
resources:
  a:
    type: layer
    code: a.zip
    depends_on: [b]
  b:
    type: layer
    code: b.zip
    depends_on: [a]
"#,
        );
        let err = build_execution_order(&n).unwrap_err();
        assert!(err.contains("cycle"));
        assert!(err.contains("a, b"));
    }

    #[test]
    fn test_sg003_topo_unknown_dependency() {
        let n = nested(
            r#"
resources:
  a:
    type: layer
    code: a.zip
    depends_on: [ghost]
"#,
        );
        assert!(build_execution_order(&n).unwrap_err().contains("unknown 'ghost'"));
    }

    #[test]
    fn test_sg003_logical_id_stable() {
        let a = logical_id(&["LambdaStack", "get_medias"]);
        let b = logical_id(&["LambdaStack", "get_medias"]);
        assert_eq!(a, b);
        assert!(a.starts_with("getmedias"));
        assert_eq!(a.len(), "getmedias".len() + 8);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, logical_id(&["OtherStack", "get_medias"]));
    }

    proptest! {
        #[test]
        fn prop_sg003_env_change_is_isolated(value in "[A-Za-z0-9_./:-]{0,24}") {
            let base = EnvSnapshot::from_pairs([("LOG_LEVEL", "INFO"), ("CLOUDFRONT_DOMAIN", "cdn")]);
            let changed = EnvSnapshot::from_pairs([("LOG_LEVEL", "INFO"), ("CLOUDFRONT_DOMAIN", value.as_str())]);
            let (params, props, environment) = Default::default();
            let a = ctx(&base, &params, &props, &environment);
            let b = ctx(&changed, &params, &props, &environment);
            prop_assert_eq!(
                resolve_template("{{env.LOG_LEVEL}}", &a).unwrap(),
                resolve_template("{{env.LOG_LEVEL}}", &b).unwrap()
            );
            prop_assert_eq!(resolve_template("{{env.CLOUDFRONT_DOMAIN}}", &b).unwrap(), value);
        }
    }
}
