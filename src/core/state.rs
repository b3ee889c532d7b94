//! SG-013: Lock file management: load, save (atomic), path derivation.

use super::types::StackLock;
use std::path::{Path, PathBuf};

/// Derive the lock file path for a parent stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load a stack's lock file. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StackLock>, String> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StackLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StackLock) -> Result<PathBuf, String> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp_path.display(), path.display(), e))?;

    Ok(path)
}

/// Every stack with a lock under the state directory, sorted.
pub fn list_locked_stacks(state_dir: &Path) -> Result<Vec<String>, String> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read {}: {}", state_dir.display(), e))?;
    let mut stacks = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if lock_file_path(state_dir, &name).exists() {
            stacks.push(name);
        }
    }
    stacks.sort();
    Ok(stacks)
}

/// Create a new empty lock for a parent stack.
pub fn new_lock(stack: &str) -> StackLock {
    use crate::tripwire::eventlog::now_iso8601;
    StackLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("stackgen {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        resources: indexmap::IndexMap::new(),
        assets: indexmap::IndexMap::new(),
        templates: indexmap::IndexMap::new(),
    }
}
