//! SG-017: CLI subcommands: init, validate, synth, plan, drift, status, schema, completions.

use crate::core::resolver::{self, EnvSnapshot};
use crate::core::{parser, planner, state, synth, types};
use crate::tripwire::{drift, eventlog};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "stackgen",
    version,
    about = "Declarative nested stacks for Lambda functions, layers and roles, synthesized to CloudFormation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stackgen project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stackgen.yaml and report unset environment variables
    Validate {
        /// Path to stackgen.yaml
        #[arg(short, long, default_value = "stackgen.yaml")]
        file: PathBuf,
    },

    /// Render templates, stage assets and record the lock
    Synth {
        /// Path to stackgen.yaml
        #[arg(short, long, default_value = "stackgen.yaml")]
        file: PathBuf,

        /// Cloud assembly output directory
        #[arg(short, long, default_value = "stackgen.out")]
        out: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Build the assembly in memory without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show what changed since the last synth
    Plan {
        /// Path to stackgen.yaml
        #[arg(short, long, default_value = "stackgen.yaml")]
        file: PathBuf,

        /// Only show changes in this nested stack
        #[arg(short, long)]
        stack: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Detect asset or template changes since the last synth (tripwire)
    Drift {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Cloud assembly output directory
        #[arg(short, long, default_value = "stackgen.out")]
        out: PathBuf,

        /// Only check this parent stack
        #[arg(short, long)]
        stack: Option<String>,

        /// Exit non-zero on any drift (for CI/CD)
        #[arg(long)]
        tripwire: bool,
    },

    /// Show the recorded lock of each parent stack
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Only show this parent stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print the JSON schema of stackgen.yaml
    Schema,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth {
            file,
            out,
            state_dir,
            dry_run,
        } => cmd_synth(&file, &out, &state_dir, dry_run),
        Commands::Plan {
            file,
            stack,
            state_dir,
        } => cmd_plan(&file, &state_dir, stack.as_deref()).map(|_| ()),
        Commands::Drift {
            state_dir,
            out,
            stack,
            tripwire,
        } => cmd_drift(&state_dir, &out, stack.as_deref(), tripwire),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stackgen", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("stackgen.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    let template = r#"version: "1.0"
name: MainStack
description: "Managed by stackgen"

env_file: .env

environment: {}

params: {}

stacks:
  LambdaStack:
    props: {}
    resources: {}

policy:
  strict_env: false
  tags: true
  lock_file: true
  provenance: true
"#;
    std::fs::write(&config_path, template)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stackgen project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let mut findings = parser::validate_config(&config);
    for (name, nested) in &config.stacks {
        if let Err(e) = resolver::build_execution_order(nested) {
            findings.push(parser::ValidationError {
                severity: parser::Severity::Error,
                message: format!("stack '{}': {}", name, e),
            });
        }
    }
    print_findings(&findings);
    if parser::has_errors(&findings) {
        let count = findings.iter().filter(|f| f.is_error()).count();
        return Err(format!("{} validation error(s)", count));
    }

    let env = capture_env(&config, &base_dir(file)?)?;
    let missing = resolver::missing_env_vars(&config, &env);
    for name in &missing {
        eprintln!("  WARN: environment variable {} is not set (resolves to \"\")", name);
    }
    if config.policy.strict_env && !missing.is_empty() {
        return Err(format!(
            "{} environment variable(s) unset with strict_env",
            missing.len()
        ));
    }

    let resources: usize = config.stacks.values().map(|s| s.resources.len()).sum();
    println!(
        "OK: {} ({} nested stacks, {} resources)",
        config.name,
        config.stacks.len(),
        resources
    );
    Ok(())
}

fn cmd_synth(file: &Path, out: &Path, state_dir: &Path, dry_run: bool) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let base = base_dir(file)?;
    let env = capture_env(&config, &base)?;

    let result = synth::synth(&synth::SynthConfig {
        config: &config,
        base_dir: &base,
        out_dir: out,
        state_dir,
        env: &env,
        dry_run,
    })?;

    if dry_run {
        println!(
            "Dry run: {} ({} resources, {} assets), nothing written.",
            result.stack, result.resources, result.assets
        );
        return Ok(());
    }
    for path in &result.templates {
        println!("  Wrote: {}", path.display());
    }
    println!(
        "Synth complete: {} ({} resources, {} assets, {:.2}s) → {}",
        result.stack,
        result.resources,
        result.assets,
        result.total_duration.as_secs_f64(),
        out.display()
    );
    Ok(())
}

fn cmd_plan(
    file: &Path,
    state_dir: &Path,
    stack_filter: Option<&str>,
) -> Result<types::SynthPlan, String> {
    let config = parse_and_validate(file)?;
    let base = base_dir(file)?;
    let env = capture_env(&config, &base)?;
    let assembly = synth::build_assembly(&config, &base, &env)?;
    let lock = state::load_lock(state_dir, &config.name)?;
    let plan = planner::plan(&assembly, lock.as_ref());
    print_plan(&plan, stack_filter);
    Ok(plan)
}

/// Parse and validate a definition file, printing warnings and failing on errors.
fn parse_and_validate(file: &Path) -> Result<types::StackConfig, String> {
    let config = parser::parse_config_file(file)?;
    let findings = parser::validate_config(&config);
    print_findings(&findings);
    if parser::has_errors(&findings) {
        return Err("validation failed".to_string());
    }
    Ok(config)
}

fn print_findings(findings: &[parser::ValidationError]) {
    for f in findings {
        match f.severity {
            parser::Severity::Error => eprintln!("  ERROR: {}", f),
            parser::Severity::Warning => eprintln!("  WARN: {}", f),
        }
    }
}

/// Directory asset paths and `env_file` are resolved against.
fn base_dir(file: &Path) -> Result<PathBuf, String> {
    let dir = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::canonicalize(dir).map_err(|e| format!("cannot resolve {}: {}", dir.display(), e))
}

fn capture_env(config: &types::StackConfig, base: &Path) -> Result<EnvSnapshot, String> {
    let env_file = config.env_file.as_ref().map(|f| base.join(f));
    EnvSnapshot::capture(env_file.as_deref())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::SynthPlan, stack_filter: Option<&str>) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    let mut current_stack = String::new();
    for change in &plan.changes {
        if let Some(filter) = stack_filter {
            if change.stack != filter {
                continue;
            }
        }
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            println!("{}:", current_stack);
        }
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {} [{}]", symbol, change.description, change.logical_id);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_drift(
    state_dir: &Path,
    out: &Path,
    stack_filter: Option<&str>,
    tripwire_mode: bool,
) -> Result<(), String> {
    let mut total_drift = 0;

    for name in state::list_locked_stacks(state_dir)? {
        if stack_filter.is_some_and(|f| f != name) {
            continue;
        }
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        println!(
            "Checking {} ({} assets, {} templates)...",
            name,
            lock.assets.len(),
            lock.templates.len()
        );
        let findings = drift::detect_drift(&lock, out);
        let mut log = eventlog::EventLog::open(state_dir, &name);

        if findings.is_empty() {
            println!("  No drift detected.");
            continue;
        }
        for f in &findings {
            println!("  DRIFTED: {} {} ({})", f.kind, f.target, f.detail);
            println!("    Expected: {}", f.expected_hash);
            println!("    Actual:   {}", f.actual_hash);
            let event = types::ProvenanceEvent::DriftDetected {
                stack: name.clone(),
                target: f.target.clone(),
                expected_hash: f.expected_hash.clone(),
                actual_hash: f.actual_hash.clone(),
            };
            if let Err(e) = log.append(event) {
                tracing::warn!(stack = %name, error = %e, "cannot append drift event");
            }
        }
        total_drift += findings.len();
    }

    if total_drift > 0 {
        println!();
        println!("Drift detected: {} finding(s)", total_drift);
        if tripwire_mode {
            return Err(format!("{} drift finding(s)", total_drift));
        }
    } else {
        println!("No drift detected.");
    }

    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let mut found = false;

    for name in state::list_locked_stacks(state_dir)? {
        if stack_filter.is_some_and(|f| f != name) {
            continue;
        }
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        found = true;
        println!("Stack: {}", lock.stack);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Resources: {}", lock.resources.len());
        for (path, rl) in &lock.resources {
            println!("    {}: {} [{}]", path, rl.logical_id, rl.resource_type);
        }
        println!("  Assets: {}", lock.assets.len());
        for (id, al) in &lock.assets {
            println!("    {}: {} ({})", id, al.object_key, al.source);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `stackgen synth` first.");
    }

    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(types::StackConfig);
    let json =
        serde_json::to_string_pretty(&schema).map_err(|e| format!("schema serialize error: {}", e))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::synth::tests as fixtures;

    /// Write the media definition and its assets into `dir`.
    fn write_project(dir: &Path) -> PathBuf {
        fixtures::write_assets(dir);
        let file = dir.join("stackgen.yaml");
        std::fs::write(&file, fixtures::MEDIA_API).unwrap();
        file
    }

    fn synth_project(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let file = write_project(dir);
        let out = dir.join("stackgen.out");
        let state_dir = dir.join("state");
        cmd_synth(&file, &out, &state_dir, false).unwrap();
        (file, out, state_dir)
    }

    #[test]
    fn test_sg017_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("test-project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("stackgen.yaml").exists());
        assert!(sub.join("state").is_dir());
        let config = parser::parse_config_file(&sub.join("stackgen.yaml")).unwrap();
        assert_eq!(config.name, "MainStack");
    }

    #[test]
    fn test_sg017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stackgen.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_sg017_validate_valid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_project(dir.path());
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_sg017_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stackgen.yaml");
        std::fs::write(
            &file,
            r#"
version: "2.0"
name: ""
stacks: {}
"#,
        )
        .unwrap();
        assert!(cmd_validate(&file).is_err());
    }

    #[test]
    fn test_sg017_validate_reports_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stackgen.yaml");
        std::fs::write(
            &file,
            r#"
version: "1.0"
name: MainStack
stacks:
  LambdaStack:
    resources:
      a:
        type: role
        depends_on: [b]
      b:
        type: role
        depends_on: [a]
"#,
        )
        .unwrap();
        assert!(cmd_validate(&file).is_err());
    }

    #[test]
    fn test_sg017_validate_strict_env_fails_on_missing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("stackgen.yaml");
        std::fs::write(
            &file,
            r#"
version: "1.0"
name: MainStack
environment:
  region: "{{env.STACKGEN_TEST_SURELY_UNSET_VAR}}"
stacks:
  LambdaStack:
    resources:
      r:
        type: role
policy:
  strict_env: true
"#,
        )
        .unwrap();
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("strict_env"));
    }

    #[test]
    fn test_sg017_synth_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out, state_dir) = synth_project(dir.path());
        assert!(out.join("MainStack.template.json").exists());
        assert!(out.join("manifest.json").exists());
        cmd_status(&state_dir, None).unwrap();
        cmd_status(&state_dir, Some("MainStack")).unwrap();
    }

    #[test]
    fn test_sg017_synth_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_project(dir.path());
        let out = dir.path().join("stackgen.out");
        cmd_synth(&file, &out, &dir.path().join("state"), true).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn test_sg017_plan_after_synth() {
        let dir = tempfile::tempdir().unwrap();
        let (file, _, state_dir) = synth_project(dir.path());
        let plan = cmd_plan(&file, &state_dir, None).unwrap();
        assert_eq!(plan.unchanged, 5);
        assert_eq!(plan.to_create + plan.to_update + plan.to_destroy, 0);
        let filtered = cmd_plan(&file, &state_dir, Some("LambdaStack")).unwrap();
        assert_eq!(filtered.unchanged, 5);
    }

    #[test]
    fn test_sg017_plan_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_project(dir.path());
        let plan = cmd_plan(&file, &dir.path().join("missing-state"), None).unwrap();
        assert_eq!(plan.to_create, 5);
    }

    #[test]
    fn test_sg017_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("state")).unwrap();
        cmd_status(&dir.path().join("state"), None).unwrap();
    }

    #[test]
    fn test_sg017_drift_clean_after_synth() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out, state_dir) = synth_project(dir.path());
        cmd_drift(&state_dir, &out, None, true).unwrap();
    }

    #[test]
    fn test_sg017_drift_tripwire_fails_on_asset_change() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out, state_dir) = synth_project(dir.path());
        std::fs::write(dir.path().join("function/get_medias/main.py"), "changed\n").unwrap();

        cmd_drift(&state_dir, &out, None, false).unwrap();
        let err = cmd_drift(&state_dir, &out, None, true).unwrap_err();
        assert!(err.contains("drift finding"));

        let events = eventlog::read_events(&state_dir, "MainStack").unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e.event, types::ProvenanceEvent::DriftDetected { .. })));
    }

    #[test]
    fn test_sg017_drift_stack_filter() {
        let dir = tempfile::tempdir().unwrap();
        let (_, out, state_dir) = synth_project(dir.path());
        std::fs::remove_file(out.join("MainStack.template.json")).unwrap();
        cmd_drift(&state_dir, &out, Some("OtherStack"), true).unwrap();
        assert!(cmd_drift(&state_dir, &out, Some("MainStack"), true).is_err());
    }

    #[test]
    fn test_sg017_dispatch_schema() {
        dispatch(Commands::Schema).unwrap();
    }

    #[test]
    fn test_sg017_dispatch_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("dispatch-init");
        dispatch(Commands::Init { path: sub.clone() }).unwrap();
        assert!(sub.join("stackgen.yaml").exists());
    }

    #[test]
    fn test_sg017_dispatch_synth() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_project(dir.path());
        dispatch(Commands::Synth {
            file,
            out: dir.path().join("out"),
            state_dir: dir.path().join("state"),
            dry_run: false,
        })
        .unwrap();
        assert!(dir.path().join("out/MainStackLambdaStack.nested.template.json").exists());
    }

    #[test]
    fn test_sg017_cli_parses() {
        let cli = Cli::try_parse_from(["stackgen", "synth", "-f", "x.yaml", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Synth { dry_run: true, .. }
        ));
        Cli::command().debug_assert();
    }
}
