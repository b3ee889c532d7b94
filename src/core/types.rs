//! SG-001: Stack definition, CloudFormation template, lock and provenance types.
//!
//! Defines the YAML schema of `stackgen.yaml` (parent stack, nested stack
//! definitions, roles, layers, functions), the CloudFormation template model
//! the synthesizer renders into, and the lock/event types persisted after synth.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level stackgen.yaml
// ============================================================================

/// Root definition: the parent stack and the nested stacks it composes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Parent stack name (also the tag key applied to every resource)
    pub name: String,

    /// Optional description, copied into the parent template
    #[serde(default)]
    pub description: Option<String>,

    /// Dotenv file merged under the process environment, relative to this file
    #[serde(default)]
    pub env_file: Option<String>,

    /// Target account/region literals
    #[serde(default)]
    pub environment: StackEnvironment,

    /// Global parameters (templatable)
    #[serde(default)]
    #[schemars(with = "IndexMap<String, serde_json::Value>")]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Nested stacks instantiated by the parent (order-preserving)
    pub stacks: IndexMap<String, NestedStack>,

    /// Synthesis policy
    #[serde(default)]
    pub policy: Policy,
}

/// Literal account and region. Absent values fall back to pseudo-parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StackEnvironment {
    #[serde(default)]
    pub account: Option<String>,

    #[serde(default)]
    pub region: Option<String>,
}

/// One nested stack definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NestedStack {
    #[serde(default)]
    pub description: Option<String>,

    /// Properties record passed from the parent at construction time
    #[serde(default)]
    #[schemars(with = "IndexMap<String, serde_json::Value>")]
    pub props: IndexMap<String, serde_yaml_ng::Value>,

    /// Resource declarations (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, Resource>,
}

// ============================================================================
// Resources
// ============================================================================

/// A declared cloud resource.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Role(RoleSpec),
    Layer(LayerSpec),
    Function(FunctionSpec),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Role(_) => ResourceKind::Role,
            Self::Layer(_) => ResourceKind::Layer,
            Self::Function(_) => ResourceKind::Function,
        }
    }

    /// Explicit dependencies declared with `depends_on`.
    pub fn depends_on(&self) -> &[String] {
        match self {
            Self::Role(r) => &r.depends_on,
            Self::Layer(l) => &l.depends_on,
            Self::Function(f) => &f.depends_on,
        }
    }

    /// Output name published for this resource, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Role(_) => None,
            Self::Layer(l) => l.output.as_deref(),
            Self::Function(f) => f.output.as_deref(),
        }
    }

    /// Every resource id this one must be ordered after.
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = self.depends_on().iter().map(String::as_str).collect();
        if let Self::Function(f) = self {
            refs.extend(f.layers.iter().map(String::as_str));
            if let Some(ref role) = f.role {
                refs.push(role);
            }
        }
        refs
    }
}

/// Resource kind, used for display and validation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Role,
    Layer,
    Function,
}

impl ResourceKind {
    /// CloudFormation resource type rendered for this kind.
    pub fn cfn_type(&self) -> &'static str {
        match self {
            Self::Role => "AWS::IAM::Role",
            Self::Layer => "AWS::Lambda::LayerVersion",
            Self::Function => "AWS::Lambda::Function",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role => write!(f, "role"),
            Self::Layer => write!(f, "layer"),
            Self::Function => write!(f, "function"),
        }
    }
}

/// Execution role.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RoleSpec {
    /// Service principal allowed to assume the role
    #[serde(default = "default_principal")]
    pub assumed_by: String,

    /// AWS managed policy names (e.g. `service-role/AWSLambdaBasicExecutionRole`)
    #[serde(default)]
    pub managed_policies: Vec<String>,

    /// Inline policy statements, rendered as the role's default policy
    #[serde(default)]
    pub statements: Vec<PolicyStatement>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_principal() -> String {
    "lambda.amazonaws.com".to_string()
}

/// A single IAM policy statement.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PolicyStatement {
    #[serde(default)]
    pub effect: Effect,

    pub actions: Vec<String>,

    pub resources: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Effect {
    #[default]
    Allow,
    Deny,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "Allow"),
            Self::Deny => write!(f, "Deny"),
        }
    }
}

/// Shared code layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LayerSpec {
    /// Asset path (archive or directory), relative to the definition file
    pub code: String,

    /// Glob patterns left out when a directory is packaged
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub compatible_runtimes: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Layer version name
    #[serde(default)]
    pub layer_name: Option<String>,

    /// Output name for the layer version ARN
    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Compute function.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FunctionSpec {
    /// Runtime identifier (e.g. `python3.12`)
    pub runtime: String,

    /// Entry point (e.g. `main.handler`)
    pub handler: String,

    /// Asset path (archive or directory), relative to the definition file
    pub code: String,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Environment mapping (templatable values)
    #[serde(default)]
    pub environment: IndexMap<String, String>,

    /// Attached layer resource ids
    #[serde(default)]
    pub layers: Vec<String>,

    /// Timeout in seconds
    #[serde(default)]
    pub timeout: Option<u32>,

    /// Memory size in MB
    #[serde(default)]
    pub memory_size: Option<u32>,

    #[serde(default)]
    pub description: Option<String>,

    /// Execution role resource id; a default role is synthesized when absent
    #[serde(default)]
    pub role: Option<String>,

    /// Output name for the function ARN
    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,
}

// ============================================================================
// Runtimes
// ============================================================================

/// Runtime family, derived from the runtime identifier prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFamily {
    Python,
    NodeJs,
    Java,
    DotNet,
    Ruby,
    Go,
    Provided,
}

impl RuntimeFamily {
    /// Family of a runtime identifier, or None when the prefix is unknown.
    pub fn of(runtime: &str) -> Option<Self> {
        const PREFIXES: [(&str, RuntimeFamily); 7] = [
            ("python", RuntimeFamily::Python),
            ("nodejs", RuntimeFamily::NodeJs),
            ("java", RuntimeFamily::Java),
            ("dotnet", RuntimeFamily::DotNet),
            ("ruby", RuntimeFamily::Ruby),
            ("go", RuntimeFamily::Go),
            ("provided", RuntimeFamily::Provided),
        ];
        PREFIXES
            .iter()
            .find(|(prefix, _)| runtime.starts_with(prefix))
            .map(|(_, family)| *family)
    }
}

impl fmt::Display for RuntimeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::NodeJs => write!(f, "nodejs"),
            Self::Java => write!(f, "java"),
            Self::DotNet => write!(f, "dotnet"),
            Self::Ruby => write!(f, "ruby"),
            Self::Go => write!(f, "go"),
            Self::Provided => write!(f, "provided"),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Synthesis policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// Fail instead of substituting "" for a missing environment variable
    #[serde(default)]
    pub strict_env: bool,

    /// Tag every taggable resource with `{parent stack name: resource id}`
    #[serde(default = "default_true")]
    pub tags: bool,

    /// Asset bucket name (may contain `${AWS::...}` pseudo-parameters)
    #[serde(default = "default_asset_bucket")]
    pub asset_bucket: String,

    /// Persist the BLAKE3 lock after synth
    #[serde(default = "default_true")]
    pub lock_file: bool,

    /// Append provenance events to the stack's event log
    #[serde(default = "default_true")]
    pub provenance: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            strict_env: false,
            tags: true,
            asset_bucket: default_asset_bucket(),
            lock_file: true,
            provenance: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_asset_bucket() -> String {
    "stackgen-assets-${AWS::AccountId}-${AWS::Region}".to_string()
}

// ============================================================================
// CloudFormation template model
// ============================================================================

/// A CloudFormation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, TemplateParameter>,

    pub resources: IndexMap<String, CfnResource>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, CfnOutput>,
}

impl Template {
    pub fn new(description: Option<String>) -> Self {
        Self {
            format_version: "2010-09-09".to_string(),
            description,
            parameters: IndexMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }
}

/// Template parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemplateParameter {
    #[serde(rename = "Type")]
    pub param_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// A rendered template resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    pub properties: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A template output binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnOutput {
    pub value: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-parent-stack lock written after synth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLock {
    /// Schema version
    pub schema: String,

    /// Parent stack name
    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Per-resource state keyed by `<nested>/<resource>` path
    pub resources: IndexMap<String, ResourceLock>,

    /// Per-asset source fingerprints keyed by asset id
    #[serde(default)]
    pub assets: IndexMap<String, AssetLock>,

    /// Written template file name → BLAKE3 hash
    #[serde(default)]
    pub templates: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    /// Template logical id
    pub logical_id: String,

    /// CloudFormation resource type
    #[serde(rename = "type")]
    pub resource_type: String,

    /// BLAKE3 hash of the rendered resource
    pub hash: String,
}

/// Per-asset lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetLock {
    /// Absolute source path
    pub source: String,

    /// Exclude globs used when fingerprinting
    #[serde(default)]
    pub exclude: Vec<String>,

    /// SHA-256 fingerprint of the source at synth time
    pub fingerprint: String,

    /// Destination object key
    pub object_key: String,
}

// ============================================================================
// Plan
// ============================================================================

/// Action the deployment engine would take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// `<nested>/<resource>` path
    pub path: String,

    /// Nested stack the resource belongs to (parent name for nested stack resources)
    pub stack: String,

    pub logical_id: String,

    pub resource_type: String,

    pub action: PlanAction,

    /// Human-readable description
    pub description: String,
}

/// Full change plan against the last synth.
#[derive(Debug, Clone)]
pub struct SynthPlan {
    pub name: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    SynthStarted {
        stack: String,
        stackgen_version: String,
    },
    AssetStaged {
        stack: String,
        asset: String,
        object_key: String,
        bytes: u64,
    },
    TemplateWritten {
        stack: String,
        template: String,
        hash: String,
    },
    SynthCompleted {
        stack: String,
        resources: u32,
        assets: u32,
        total_seconds: f64,
    },
    DriftDetected {
        stack: String,
        target: String,
        expected_hash: String,
        actual_hash: String,
    },
}

/// One line of the event log: the event plus the run that wrote it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    pub run_id: String,
    /// Position of the event within its run, from 0
    pub seq: u32,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Synth result
// ============================================================================

/// Result of synthesizing one parent stack.
#[derive(Debug, Clone)]
pub struct SynthResult {
    pub stack: String,
    pub resources: u32,
    pub assets: u32,
    pub templates: Vec<std::path::PathBuf>,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
