//! SG-012: Synthesizer: builds the cloud assembly for one parent stack.
//!
//! resolve environment → per nested stack: resolve templates → DAG → inspect
//! assets → render resources and outputs → parent template → stage assets →
//! write templates and manifest → lock → events

use super::assets::{self, AssetSource};
use super::codegen::{self, RenderContext};
use super::resolver::{self, EnvSnapshot, TemplateContext};
use super::state;
use super::types::*;
use crate::resources;
use crate::tripwire::{eventlog, hasher};
use indexmap::IndexMap;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Configuration for a synth run.
pub struct SynthConfig<'a> {
    pub config: &'a StackConfig,
    /// Directory asset locations are resolved against
    pub base_dir: &'a Path,
    pub out_dir: &'a Path,
    pub state_dir: &'a Path,
    pub env: &'a EnvSnapshot,
    pub dry_run: bool,
}

/// A rendered nested stack.
#[derive(Debug, Clone)]
pub struct NestedAssembly {
    /// Logical id of the `AWS::CloudFormation::Stack` in the parent
    pub logical_id: String,
    pub template: Template,
    /// Serialized template, exactly as written to disk
    pub body: String,
    /// Object key of the staged template (`<sha256>.json`)
    pub template_key: String,
    /// Topological resource order
    pub order: Vec<String>,
}

/// One declared resource (or nested stack) in the synthesized graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// `<nested>/<resource>` path, or the nested stack name
    pub path: String,
    /// Stack the node is rendered into
    pub stack: String,
    pub logical_id: String,
    pub resource_type: String,
    /// BLAKE3 over everything the node rendered
    pub hash: String,
}

/// In-memory cloud assembly.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub name: String,
    pub parent: Template,
    pub nested: IndexMap<String, NestedAssembly>,
    /// Assets keyed by `<nested>/<resource>` path
    pub assets: IndexMap<String, AssetSource>,
    pub nodes: Vec<GraphNode>,
}

/// File name of a written template.
pub fn template_file_name(parent: &str, nested: Option<&str>) -> String {
    match nested {
        Some(n) => format!("{}{}.nested.template.json", parent, n),
        None => format!("{}.template.json", parent),
    }
}

/// Serialize a template the way it is written to disk.
pub fn render_template_json(template: &Template) -> Result<String, String> {
    let mut body = serde_json::to_string_pretty(template)
        .map_err(|e| format!("template serialize error: {}", e))?;
    body.push('\n');
    Ok(body)
}

/// Build the assembly without touching the output directory.
pub fn build_assembly(
    config: &StackConfig,
    base_dir: &Path,
    env: &EnvSnapshot,
) -> Result<Assembly, String> {
    let environment = resolver::resolve_environment(config, env)?;
    let mut parent = Template::new(config.description.clone());
    let mut nested_out = IndexMap::new();
    let mut all_assets = IndexMap::new();
    let mut nodes = Vec::new();

    for (nested_name, nested) in &config.stacks {
        let tctx = TemplateContext {
            stack_name: &config.name,
            env,
            params: &config.params,
            props: &nested.props,
            environment: &environment,
            strict_env: config.policy.strict_env,
        };

        let mut resolved = IndexMap::new();
        for (id, resource) in &nested.resources {
            let r = resolver::resolve_resource_templates(resource, &tctx)
                .map_err(|e| format!("{}/{}: {}", nested_name, id, e))?;
            resolved.insert(id.clone(), r);
        }
        let order = resolver::build_execution_order(nested)
            .map_err(|e| format!("stack '{}': {}", nested_name, e))?;

        let mut stack_assets = IndexMap::new();
        for (id, resource) in &resolved {
            let (code, exclude) = match resource {
                Resource::Layer(l) => (&l.code, &l.exclude),
                Resource::Function(f) => (&f.code, &f.exclude),
                Resource::Role(_) => continue,
            };
            let path = format!("{}/{}", nested_name, id);
            let asset = assets::inspect(&path, base_dir, code, exclude)?;
            stack_assets.insert(path, asset);
        }

        let (template, stack_nodes) = render_nested(config, nested_name, nested, &resolved, &order, &stack_assets)?;
        nodes.extend(stack_nodes);

        let body = render_template_json(&template)?;
        let template_key = format!("{:x}.json", Sha256::digest(body.as_bytes()));

        let (logical, stack_resource) = resources::stack::render(
            &config.name,
            nested_name,
            &template_key,
            &nested.props,
            &config.policy,
        );
        nodes.push(GraphNode {
            path: nested_name.clone(),
            stack: config.name.clone(),
            logical_id: logical.clone(),
            resource_type: stack_resource.resource_type.clone(),
            hash: hasher::composite_hash(&[
                &template_key,
                &hasher::hash_json(&stack_resource.properties),
            ]),
        });
        parent.resources.insert(logical.clone(), stack_resource);

        tracing::debug!(
            stack = %nested_name,
            resources = template.resources.len(),
            key = %template_key,
            "nested stack rendered"
        );
        nested_out.insert(
            nested_name.clone(),
            NestedAssembly {
                logical_id: logical,
                template,
                body,
                template_key,
                order,
            },
        );
        all_assets.extend(stack_assets);
    }

    Ok(Assembly {
        name: config.name.clone(),
        parent,
        nested: nested_out,
        assets: all_assets,
        nodes,
    })
}

fn render_nested(
    config: &StackConfig,
    nested_name: &str,
    nested: &NestedStack,
    resolved: &IndexMap<String, Resource>,
    order: &[String],
    stack_assets: &IndexMap<String, AssetSource>,
) -> Result<(Template, Vec<GraphNode>), String> {
    let rctx = RenderContext {
        parent: &config.name,
        nested: nested_name,
        policy: &config.policy,
        resources: resolved,
        assets: stack_assets,
    };
    let mut template = Template::new(nested.description.clone());
    for key in nested.props.keys() {
        template.parameters.insert(
            key.clone(),
            TemplateParameter {
                param_type: "String".to_string(),
                default: None,
            },
        );
    }

    let mut nodes = Vec::new();
    for id in order {
        let resource = resolved
            .get(id)
            .ok_or_else(|| format!("{}/{}: resource missing after resolution", nested_name, id))?;
        let rendered = codegen::render_resource(id, resource, &rctx)?;
        let mut hashed = serde_json::Map::new();
        for (logical, cfn) in rendered {
            if template.resources.contains_key(&logical) {
                return Err(format!(
                    "{}/{}: logical id '{}' already in use",
                    nested_name, id, logical
                ));
            }
            let value = serde_json::to_value(&cfn)
                .map_err(|e| format!("{}/{}: serialize error: {}", nested_name, id, e))?;
            hashed.insert(logical.clone(), value);
            template.resources.insert(logical, cfn);
        }
        if let Some((name, output)) = codegen::render_output(id, resource, &rctx) {
            if template.outputs.contains_key(&name) {
                return Err(format!("{}: duplicate output '{}'", nested_name, name));
            }
            hashed.insert(format!("output:{}", name), output.value.clone());
            template.outputs.insert(name, output);
        }
        nodes.push(GraphNode {
            path: rctx.path(id),
            stack: nested_name.to_string(),
            logical_id: rctx.logical_id(id),
            resource_type: resource.kind().cfn_type().to_string(),
            hash: hasher::hash_json(&serde_json::Value::Object(hashed)),
        });
    }
    Ok((template, nodes))
}

/// Synthesize the parent stack: stage assets, write templates, manifest, lock and events.
pub fn synth(cfg: &SynthConfig) -> Result<SynthResult, String> {
    let start = Instant::now();
    let assembly = build_assembly(cfg.config, cfg.base_dir, cfg.env)?;
    let stack = assembly.name.as_str();
    let resource_count = assembly.nodes.len() as u32;
    let asset_count = assembly.assets.len() as u32;

    if cfg.dry_run {
        return Ok(SynthResult {
            stack: stack.to_string(),
            resources: resource_count,
            assets: asset_count,
            templates: Vec::new(),
            total_duration: start.elapsed(),
        });
    }

    let mut log = eventlog::EventLog::open(cfg.state_dir, stack);
    tracing::info!(stack, run_id = log.run_id(), out = %cfg.out_dir.display(), "synth started");
    record(
        cfg,
        &mut log,
        ProvenanceEvent::SynthStarted {
            stack: stack.to_string(),
            stackgen_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );

    let assets_dir = cfg.out_dir.join("assets");
    let mut lock = state::new_lock(stack);
    let mut manifest_assets = Vec::new();

    for asset in assembly.assets.values() {
        let (_, bytes) = assets::stage(asset, &assets_dir)?;
        tracing::info!(asset = %asset.id, key = %asset.object_key(), bytes, "asset staged");
        lock.assets.insert(
            asset.id.clone(),
            AssetLock {
                source: asset.path.display().to_string(),
                exclude: asset.exclude.clone(),
                fingerprint: asset.fingerprint.clone(),
                object_key: asset.object_key(),
            },
        );
        manifest_assets.push(json!({
            "id": asset.id,
            "source": asset.path.display().to_string(),
            "packaging": asset.packaging.to_string(),
            "objectKey": asset.object_key(),
        }));
        record(
            cfg,
            &mut log,
            ProvenanceEvent::AssetStaged {
                stack: stack.to_string(),
                asset: asset.id.clone(),
                object_key: asset.object_key(),
                bytes,
            },
        );
    }

    let mut templates = Vec::new();
    let mut manifest_nested = serde_json::Map::new();
    for (name, nested) in &assembly.nested {
        let file = template_file_name(stack, Some(name));
        let path = write_atomic(cfg.out_dir, &file, &nested.body)?;
        write_atomic(&assets_dir, &nested.template_key, &nested.body)?;
        record_template(cfg, stack, &mut log, &file, &path, &mut lock)?;
        manifest_nested.insert(
            name.clone(),
            json!({
                "logicalId": nested.logical_id,
                "file": file,
                "objectKey": nested.template_key,
            }),
        );
        templates.push(path);
    }

    let parent_file = template_file_name(stack, None);
    let parent_body = render_template_json(&assembly.parent)?;
    let parent_path = write_atomic(cfg.out_dir, &parent_file, &parent_body)?;
    record_template(cfg, stack, &mut log, &parent_file, &parent_path, &mut lock)?;
    templates.push(parent_path);

    let manifest = json!({
        "version": "1.0",
        "stack": stack,
        "generator": format!("stackgen {}", env!("CARGO_PKG_VERSION")),
        "template": parent_file,
        "assetBucket": cfg.config.policy.asset_bucket,
        "nested": manifest_nested,
        "assets": manifest_assets,
    });
    let manifest_body = serde_json::to_string_pretty(&manifest)
        .map_err(|e| format!("manifest serialize error: {}", e))?;
    write_atomic(cfg.out_dir, "manifest.json", &format!("{}\n", manifest_body))?;

    for node in &assembly.nodes {
        lock.resources.insert(
            node.path.clone(),
            ResourceLock {
                logical_id: node.logical_id.clone(),
                resource_type: node.resource_type.clone(),
                hash: node.hash.clone(),
            },
        );
    }
    if cfg.config.policy.lock_file {
        let lock_path = state::save_lock(cfg.state_dir, &lock)?;
        tracing::debug!(path = %lock_path.display(), "lock saved");
    }

    let total = start.elapsed();
    record(
        cfg,
        &mut log,
        ProvenanceEvent::SynthCompleted {
            stack: stack.to_string(),
            resources: resource_count,
            assets: asset_count,
            total_seconds: total.as_secs_f64(),
        },
    );
    tracing::info!(stack, resources = resource_count, assets = asset_count, "synth completed");

    Ok(SynthResult {
        stack: stack.to_string(),
        resources: resource_count,
        assets: asset_count,
        templates,
        total_duration: total,
    })
}

fn record_template(
    cfg: &SynthConfig,
    stack: &str,
    log: &mut eventlog::EventLog,
    file: &str,
    path: &Path,
    lock: &mut StackLock,
) -> Result<(), String> {
    let hash = hasher::hash_file(path)?;
    lock.templates.insert(file.to_string(), hash.clone());
    record(
        cfg,
        log,
        ProvenanceEvent::TemplateWritten {
            stack: stack.to_string(),
            template: file.to_string(),
            hash,
        },
    );
    Ok(())
}

fn record(cfg: &SynthConfig, log: &mut eventlog::EventLog, event: ProvenanceEvent) {
    if !cfg.config.policy.provenance {
        return;
    }
    if let Err(e) = log.append(event) {
        tracing::warn!(run_id = log.run_id(), error = %e, "cannot append provenance event");
    }
}

/// Write a file atomically (write to temp, then rename).
fn write_atomic(dir: &Path, name: &str, content: &str) -> Result<PathBuf, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("cannot create dir {}: {}", dir.display(), e))?;
    let path = dir.join(name);
    let tmp = dir.join(format!("{}.tmp", name));
    std::fs::write(&tmp, content).map_err(|e| format!("cannot write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp.display(), path.display(), e))?;
    Ok(path)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::parser;

    pub(crate) const MEDIA_API: &str = r#"
version: "1.0"
name: MainStack
environment:
  region: "{{env.DEFAULT_AWS_REGION}}"
stacks:
  LambdaStack:
    resources:
      getMediasLambdaRole:
        type: role
        managed_policies: [service-role/AWSLambdaBasicExecutionRole]
        statements:
          - actions: [s3:Scan, s3:GetItem]
            resources:
              - "arn:aws:dynamodb:{{env.DEFAULT_AWS_REGION}}:{{stack.account}}:table/{{env.METADATA_TABLE_NAME}}"
      PythonLayer:
        type: layer
        code: layer/layer_package.zip
        compatible_runtimes: [python3.12]
        description: Lambda Layer for MyFunction
        layer_name: Choiflix-Python-Layer
        output: LayerVersionArn
      get_medias:
        type: function
        runtime: python3.12
        handler: main.handler
        code: function/get_medias
        layers: [PythonLayer]
        timeout: 15
        environment:
          METADATA_DDB_TABLE_NAME: "{{env.METADATA_DDB_TABLE_NAME}}"
          LOG_LEVEL: "{{env.LOG_LEVEL}}"
        output: getMediasARN
      get_media_url:
        type: function
        runtime: python3.12
        handler: main.handler
        code: function/get_media_url
        layers: [PythonLayer]
        timeout: 15
        environment:
          CF_PRIVATE_KEY_SECRET_ID: "{{env.CF_PRIVATE_KEY_SECRET_ID}}"
          CF_PUBLIC_KEY_ID: "{{env.CF_PUBLIC_KEY_ID}}"
          CF_DEFAULT_URL_EXP: "{{env.CF_DEFAULT_URL_EXP}}"
          LOG_LEVEL: "{{env.LOG_LEVEL}}"
          CLOUDFRONT_DOMAIN: "{{env.CLOUDFRONT_DOMAIN}}"
          METADATA_DDB_TABLE_NAME: "{{env.METADATA_DDB_TABLE_NAME}}"
        output: getMediaUrlARN
"#;

    /// Lay out the code assets MEDIA_API references under `dir`.
    pub(crate) fn write_assets(dir: &Path) {
        std::fs::create_dir_all(dir.join("layer")).unwrap();
        std::fs::write(dir.join("layer/layer_package.zip"), b"PK\x05\x06layer").unwrap();
        for f in ["get_medias", "get_media_url"] {
            let d = dir.join("function").join(f);
            std::fs::create_dir_all(&d).unwrap();
            std::fs::write(d.join("main.py"), format!("def handler(e, c):\n    return '{}'\n", f))
                .unwrap();
        }
    }

    pub(crate) fn env() -> EnvSnapshot {
        EnvSnapshot::from_pairs([
            ("DEFAULT_AWS_REGION", "eu-west-2"),
            ("METADATA_TABLE_NAME", "media-metadata"),
            ("METADATA_DDB_TABLE_NAME", "media-metadata"),
            ("LOG_LEVEL", "INFO"),
            ("CF_PUBLIC_KEY_ID", "K2ABC"),
        ])
    }

    fn function_props<'a>(asm: &'a Assembly, id: &str) -> &'a serde_json::Value {
        let nested = &asm.nested["LambdaStack"];
        let logical = resolver::logical_id(&["LambdaStack", id]);
        &nested.template.resources[&logical].properties
    }

    #[test]
    fn test_sg012_template_file_names() {
        assert_eq!(template_file_name("MainStack", None), "MainStack.template.json");
        assert_eq!(
            template_file_name("MainStack", Some("LambdaStack")),
            "MainStackLambdaStack.nested.template.json"
        );
    }

    #[test]
    fn test_sg012_exactly_one_child_stack() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let asm = build_assembly(&config, dir.path(), &env()).unwrap();
        assert_eq!(asm.nested.len(), 1);
        assert_eq!(asm.parent.resources.len(), 1);
        let (_, res) = asm.parent.resources.first().unwrap();
        assert_eq!(res.resource_type, "AWS::CloudFormation::Stack");
        assert_eq!(asm.assets.len(), 3);
    }

    #[test]
    fn test_sg012_layer_shared_by_every_function() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let asm = build_assembly(&config, dir.path(), &env()).unwrap();
        let layer_ref = json!([{ "Ref": resolver::logical_id(&["LambdaStack", "PythonLayer"]) }]);
        assert_eq!(function_props(&asm, "get_medias")["Layers"], layer_ref);
        assert_eq!(function_props(&asm, "get_media_url")["Layers"], layer_ref);
    }

    #[test]
    fn test_sg012_environment_keys_present_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let asm = build_assembly(&config, dir.path(), &env()).unwrap();
        let vars = &function_props(&asm, "get_media_url")["Environment"]["Variables"];
        for key in [
            "CF_PRIVATE_KEY_SECRET_ID",
            "CF_PUBLIC_KEY_ID",
            "CF_DEFAULT_URL_EXP",
            "LOG_LEVEL",
            "CLOUDFRONT_DOMAIN",
            "METADATA_DDB_TABLE_NAME",
        ] {
            assert!(vars.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(vars["CLOUDFRONT_DOMAIN"], "");
        assert_eq!(vars["CF_PUBLIC_KEY_ID"], "K2ABC");
    }

    #[test]
    fn test_sg012_env_change_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let before = build_assembly(&config, dir.path(), &env()).unwrap();
        let changed = EnvSnapshot::from_pairs([
            ("DEFAULT_AWS_REGION", "eu-west-2"),
            ("METADATA_TABLE_NAME", "media-metadata"),
            ("METADATA_DDB_TABLE_NAME", "media-metadata"),
            ("LOG_LEVEL", "INFO"),
            ("CF_PUBLIC_KEY_ID", "K9XYZ"),
        ]);
        let after = build_assembly(&config, dir.path(), &changed).unwrap();

        let a = function_props(&before, "get_media_url");
        let b = function_props(&after, "get_media_url");
        assert_eq!(b["Environment"]["Variables"]["CF_PUBLIC_KEY_ID"], "K9XYZ");
        let mut a_vars = a["Environment"]["Variables"].clone();
        a_vars["CF_PUBLIC_KEY_ID"] = json!("K9XYZ");
        assert_eq!(a_vars, b["Environment"]["Variables"]);
        assert_eq!(
            function_props(&before, "get_medias"),
            function_props(&after, "get_medias")
        );
    }

    #[test]
    fn test_sg012_role_policy_arn_interpolated() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let asm = build_assembly(&config, dir.path(), &env()).unwrap();
        let logical = resolver::logical_id(&["LambdaStack", "getMediasLambdaRole/DefaultPolicy"]);
        let policy = &asm.nested["LambdaStack"].template.resources[&logical];
        assert_eq!(
            policy.properties["PolicyDocument"]["Statement"][0]["Resource"]["Fn::Sub"],
            "arn:aws:dynamodb:eu-west-2:${AWS::AccountId}:table/media-metadata"
        );
    }

    #[test]
    fn test_sg012_outputs() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let asm = build_assembly(&config, dir.path(), &env()).unwrap();
        let outputs = &asm.nested["LambdaStack"].template.outputs;
        let names: Vec<_> = outputs.keys().map(String::as_str).collect();
        assert!(names.contains(&"LayerVersionArn"));
        assert!(names.contains(&"getMediasARN"));
        assert!(names.contains(&"getMediaUrlARN"));
        assert_eq!(outputs.len(), 3);
    }

    #[test]
    fn test_sg012_missing_asset_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = parser::parse_config(MEDIA_API).unwrap();
        let err = build_assembly(&config, dir.path(), &env()).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_sg012_synth_writes_assembly() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let out = dir.path().join("out");
        let state_dir = dir.path().join("state");
        let config = parser::parse_config(MEDIA_API).unwrap();
        let env = env();
        let result = synth(&SynthConfig {
            config: &config,
            base_dir: dir.path(),
            out_dir: &out,
            state_dir: &state_dir,
            env: &env,
            dry_run: false,
        })
        .unwrap();
        assert_eq!(result.stack, "MainStack");
        assert_eq!(result.assets, 3);
        assert_eq!(result.templates.len(), 2);
        assert!(out.join("MainStack.template.json").exists());
        assert!(out.join("MainStackLambdaStack.nested.template.json").exists());
        assert!(out.join("manifest.json").exists());

        let lock = state::load_lock(&state_dir, "MainStack").unwrap().unwrap();
        assert_eq!(lock.assets.len(), 3);
        assert_eq!(lock.templates.len(), 2);
        for asset in lock.assets.values() {
            assert!(out.join("assets").join(&asset.object_key).exists());
        }

        let events = eventlog::read_events(&state_dir, "MainStack").unwrap();
        assert!(matches!(events.first().unwrap().event, ProvenanceEvent::SynthStarted { .. }));
        assert!(matches!(events.last().unwrap().event, ProvenanceEvent::SynthCompleted { .. }));
        let run_id = events[0].run_id.clone();
        assert!(events.iter().all(|e| e.run_id == run_id));
        let seqs: Vec<u32> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..events.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_sg012_synth_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let env = env();
        let mut bodies = Vec::new();
        for run in ["a", "b"] {
            let out = dir.path().join(run);
            synth(&SynthConfig {
                config: &config,
                base_dir: dir.path(),
                out_dir: &out,
                state_dir: &dir.path().join("state"),
                env: &env,
                dry_run: false,
            })
            .unwrap();
            let parent = std::fs::read(out.join("MainStack.template.json")).unwrap();
            let nested = std::fs::read(out.join("MainStackLambdaStack.nested.template.json")).unwrap();
            let mut keys: Vec<_> = std::fs::read_dir(out.join("assets"))
                .unwrap()
                .map(|e| e.unwrap().file_name())
                .collect();
            keys.sort();
            bodies.push((parent, nested, keys));
        }
        assert_eq!(bodies[0], bodies[1]);
    }

    #[test]
    fn test_sg012_props_become_string_parameters() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let yaml = MEDIA_API
            .replace(
                "  LambdaStack:\n    resources:",
                "  LambdaStack:\n    props:\n      Stage: dev\n    resources:",
            )
            .replace("layer_name: Choiflix-Python-Layer", "layer_name: Choiflix-{{props.Stage}}-Layer");
        let config = parser::parse_config(&yaml).unwrap();
        let asm = build_assembly(&config, dir.path(), &env()).unwrap();

        let nested = &asm.nested["LambdaStack"];
        assert_eq!(nested.template.parameters.len(), 1);
        assert_eq!(nested.template.parameters["Stage"].param_type, "String");
        let body: serde_json::Value = serde_json::from_str(&nested.body).unwrap();
        assert_eq!(body["Parameters"]["Stage"]["Type"], "String");

        let layer = resolver::logical_id(&["LambdaStack", "PythonLayer"]);
        assert_eq!(
            nested.template.resources[&layer].properties["LayerName"],
            json!({"Fn::Sub": "Choiflix-${Stage}-Layer"})
        );
        let (_, stack) = asm.parent.resources.first().unwrap();
        assert_eq!(stack.properties["Parameters"]["Stage"], "dev");
    }

    #[test]
    fn test_sg012_env_value_with_dollar_brace_stays_literal() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let config = parser::parse_config(MEDIA_API).unwrap();
        let env = EnvSnapshot::from_pairs([
            ("DEFAULT_AWS_REGION", "eu-west-2"),
            ("METADATA_TABLE_NAME", "media-metadata"),
            ("LOG_LEVEL", "${HOME}"),
        ]);
        let asm = build_assembly(&config, dir.path(), &env).unwrap();
        assert_eq!(
            function_props(&asm, "get_medias")["Environment"]["Variables"]["LOG_LEVEL"],
            "${HOME}"
        );
    }

    #[test]
    fn test_sg012_saved_lock_plans_as_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let out = dir.path().join("out");
        let state_dir = dir.path().join("state");
        let config = parser::parse_config(MEDIA_API).unwrap();
        let env = env();
        synth(&SynthConfig {
            config: &config,
            base_dir: dir.path(),
            out_dir: &out,
            state_dir: &state_dir,
            env: &env,
            dry_run: false,
        })
        .unwrap();

        let lock = state::load_lock(&state_dir, "MainStack").unwrap().unwrap();
        let asm = build_assembly(&config, dir.path(), &env).unwrap();
        let plan = crate::core::planner::plan(&asm, Some(&lock));
        assert_eq!(plan.unchanged, 5);
        assert_eq!(plan.to_create + plan.to_update + plan.to_destroy, 0);
    }

    #[test]
    fn test_sg012_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_assets(dir.path());
        let out = dir.path().join("out");
        let state_dir = dir.path().join("state");
        let config = parser::parse_config(MEDIA_API).unwrap();
        let env = env();
        let result = synth(&SynthConfig {
            config: &config,
            base_dir: dir.path(),
            out_dir: &out,
            state_dir: &state_dir,
            env: &env,
            dry_run: true,
        })
        .unwrap();
        assert!(result.templates.is_empty());
        assert!(!out.exists());
        assert!(!state_dir.exists());
    }
}
