//! SG-002: YAML parsing and validation.
//!
//! Parses stackgen.yaml and validates structural constraints:
//! - Version must be "1.0", names must not be empty
//! - Layer, role and depends_on references must exist and have the right kind
//! - Required fields and Lambda limits per resource type
//!
//! Questionable-but-legal configuration (an unattached role, actions whose
//! service does not match the resource ARN) is reported as a warning and
//! reproduced as declared.

use super::types::*;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

static PARAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid regex"));

static RUNTIME_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+[0-9a-z.]*$").expect("valid regex"));

static ACTION_SERVICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9-]+):").expect("valid regex"));

static ARN_SERVICE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^arn:[^:]*:([^:]+):").expect("valid regex"));

const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 1..=900;
const MEMORY_RANGE: std::ops::RangeInclusive<u32> = 128..=10240;

/// Validation finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Validation finding.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub severity: Severity,
    pub message: String,
}

impl ValidationError {
    fn error(message: String) -> Self {
        Self {
            severity: Severity::Error,
            message,
        }
    }

    fn warning(message: String) -> Self {
        Self {
            severity: Severity::Warning,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stackgen.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<StackConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stackgen.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns errors and warnings (empty = clean).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError::error(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.name.is_empty() {
        errors.push(ValidationError::error("name must not be empty".to_string()));
    }

    if config.stacks.is_empty() {
        errors.push(ValidationError::error(
            "at least one nested stack must be declared".to_string(),
        ));
    }

    for key in config.params.keys() {
        if key.is_empty() {
            errors.push(ValidationError::error("param name must not be empty".to_string()));
        }
    }

    let mut outputs: HashSet<(&str, &str)> = HashSet::new();
    for (stack_name, nested) in &config.stacks {
        for key in nested.props.keys() {
            if !PARAM_NAME.is_match(key) {
                errors.push(ValidationError::error(format!(
                    "stack '{}' prop '{}' must be alphanumeric",
                    stack_name, key
                )));
            }
        }
        if nested.resources.is_empty() {
            errors.push(ValidationError::warning(format!(
                "stack '{}' declares no resources",
                stack_name
            )));
        }
        for (id, resource) in &nested.resources {
            if let Some(name) = resource.output() {
                if !outputs.insert((stack_name, name)) {
                    errors.push(ValidationError::error(format!(
                        "stack '{}' output '{}' is declared more than once",
                        stack_name, name
                    )));
                }
            }
            validate_resource(stack_name, id, resource, nested, &mut errors);
        }
        warn_unattached_roles(stack_name, nested, &mut errors);
    }

    errors
}

/// True when any finding is an error.
pub fn has_errors(findings: &[ValidationError]) -> bool {
    findings.iter().any(ValidationError::is_error)
}

fn validate_resource(
    stack: &str,
    id: &str,
    resource: &Resource,
    nested: &NestedStack,
    errors: &mut Vec<ValidationError>,
) {
    if !id.chars().any(|c| c.is_ascii_alphanumeric()) {
        errors.push(ValidationError::error(format!(
            "resource '{}' id needs at least one alphanumeric character",
            id
        )));
    }

    for dep in resource.depends_on() {
        if !nested.resources.contains_key(dep) {
            errors.push(ValidationError::error(format!(
                "resource '{}' depends on unknown resource '{}'",
                id, dep
            )));
        }
        if dep == id {
            errors.push(ValidationError::error(format!(
                "resource '{}' depends on itself",
                id
            )));
        }
    }

    match resource {
        Resource::Role(role) => validate_role(id, role, errors),
        Resource::Layer(layer) => {
            if layer.code.is_empty() {
                errors.push(ValidationError::error(format!(
                    "resource '{}' (layer) has no code",
                    id
                )));
            }
            for runtime in &layer.compatible_runtimes {
                check_runtime(id, runtime, errors);
            }
        }
        Resource::Function(function) => validate_function(stack, id, function, nested, errors),
    }
}

fn validate_role(id: &str, role: &RoleSpec, errors: &mut Vec<ValidationError>) {
    if role.assumed_by.is_empty() {
        errors.push(ValidationError::error(format!(
            "resource '{}' (role) has no assumed_by principal",
            id
        )));
    }
    for (i, stmt) in role.statements.iter().enumerate() {
        if stmt.actions.is_empty() {
            errors.push(ValidationError::error(format!(
                "resource '{}' (role) statement {} has no actions",
                id, i
            )));
        }
        if stmt.resources.is_empty() {
            errors.push(ValidationError::error(format!(
                "resource '{}' (role) statement {} has no resources",
                id, i
            )));
        }
        for action in &stmt.actions {
            let Some(action_service) = service_of_action(action) else {
                continue;
            };
            for arn in &stmt.resources {
                if let Some(arn_service) = service_of_arn(arn) {
                    if !action_service.eq_ignore_ascii_case(arn_service) {
                        errors.push(ValidationError::warning(format!(
                            "resource '{}' (role) grants '{}' on a {} ARN ({})",
                            id, action, arn_service, arn
                        )));
                    }
                }
            }
        }
    }
}

fn validate_function(
    stack: &str,
    id: &str,
    function: &FunctionSpec,
    nested: &NestedStack,
    errors: &mut Vec<ValidationError>,
) {
    if function.handler.is_empty() {
        errors.push(ValidationError::error(format!(
            "resource '{}' (function) has no handler",
            id
        )));
    }
    if function.code.is_empty() {
        errors.push(ValidationError::error(format!(
            "resource '{}' (function) has no code",
            id
        )));
    }
    check_runtime(id, &function.runtime, errors);

    if let Some(timeout) = function.timeout {
        if !TIMEOUT_RANGE.contains(&timeout) {
            errors.push(ValidationError::error(format!(
                "resource '{}' (function) timeout {}s outside {}..={}",
                id,
                timeout,
                TIMEOUT_RANGE.start(),
                TIMEOUT_RANGE.end()
            )));
        }
    }
    if let Some(memory) = function.memory_size {
        if !MEMORY_RANGE.contains(&memory) {
            errors.push(ValidationError::error(format!(
                "resource '{}' (function) memory_size {}MB outside {}..={}",
                id,
                memory,
                MEMORY_RANGE.start(),
                MEMORY_RANGE.end()
            )));
        }
    }

    for key in function.environment.keys() {
        if key.is_empty() {
            errors.push(ValidationError::error(format!(
                "resource '{}' (function) has an empty environment key",
                id
            )));
        }
    }

    for layer_id in &function.layers {
        match nested.resources.get(layer_id) {
            Some(Resource::Layer(layer)) => {
                if !layer.compatible_runtimes.is_empty()
                    && !layer.compatible_runtimes.contains(&function.runtime)
                {
                    errors.push(ValidationError::warning(format!(
                        "resource '{}' (function) runtime {} is not listed by layer '{}'",
                        id, function.runtime, layer_id
                    )));
                }
            }
            Some(other) => errors.push(ValidationError::error(format!(
                "resource '{}' lists '{}' as a layer but it is a {}",
                id,
                layer_id,
                other.kind()
            ))),
            None => errors.push(ValidationError::error(format!(
                "resource '{}' references unknown layer '{}' in stack '{}'",
                id, layer_id, stack
            ))),
        }
    }

    if let Some(ref role_id) = function.role {
        match nested.resources.get(role_id) {
            Some(Resource::Role(_)) => {}
            Some(other) => errors.push(ValidationError::error(format!(
                "resource '{}' uses '{}' as its role but it is a {}",
                id,
                role_id,
                other.kind()
            ))),
            None => errors.push(ValidationError::error(format!(
                "resource '{}' references unknown role '{}' in stack '{}'",
                id, role_id, stack
            ))),
        }
    }
}

/// Roles that no function uses still deploy; say so rather than guess intent.
fn warn_unattached_roles(stack: &str, nested: &NestedStack, errors: &mut Vec<ValidationError>) {
    let attached: HashSet<&str> = nested
        .resources
        .values()
        .filter_map(|r| match r {
            Resource::Function(f) => f.role.as_deref(),
            _ => None,
        })
        .collect();
    for (id, resource) in &nested.resources {
        if matches!(resource, Resource::Role(_)) && !attached.contains(id.as_str()) {
            errors.push(ValidationError::warning(format!(
                "role '{}' in stack '{}' is not attached to any function",
                id, stack
            )));
        }
    }
}

fn check_runtime(id: &str, runtime: &str, errors: &mut Vec<ValidationError>) {
    if runtime.is_empty() {
        errors.push(ValidationError::error(format!("resource '{}' has no runtime", id)));
    } else if !RUNTIME_ID.is_match(runtime) || RuntimeFamily::of(runtime).is_none() {
        errors.push(ValidationError::error(format!(
            "resource '{}' has unknown runtime '{}'",
            id, runtime
        )));
    }
}

fn service_of_action(action: &str) -> Option<&str> {
    ACTION_SERVICE
        .captures(action)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn service_of_arn(arn: &str) -> Option<&str> {
    ARN_SERVICE
        .captures(arn)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
