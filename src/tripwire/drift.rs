//! SG-016: Drift detection: compare asset sources and written templates to the lock.

use crate::core::assets;
use crate::core::types::{AssetLock, StackLock};
use crate::tripwire::hasher;
use std::path::Path;

/// What a drift finding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftKind {
    /// Code asset source changed since synth
    Asset,
    /// Written template edited or removed since synth
    Template,
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asset => write!(f, "asset"),
            Self::Template => write!(f, "template"),
        }
    }
}

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub target: String,
    pub kind: DriftKind,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

/// Re-fingerprint an asset source and compare it to the lock.
pub fn check_asset_drift(asset_id: &str, lock: &AssetLock) -> Option<DriftFinding> {
    let source = Path::new(&lock.source);
    let finding = |actual: String, detail: String| DriftFinding {
        target: asset_id.to_string(),
        kind: DriftKind::Asset,
        expected_hash: lock.fingerprint.clone(),
        actual_hash: actual,
        detail,
    };
    // Re-inspecting classifies the source again, so a directory replaced by a file also drifts.
    match assets::inspect(asset_id, Path::new("."), &lock.source, &lock.exclude) {
        Ok(current) if current.fingerprint == lock.fingerprint => None,
        Ok(current) => Some(finding(
            current.fingerprint,
            format!("{} content changed", source.display()),
        )),
        Err(_) if !source.exists() => Some(finding(
            "MISSING".to_string(),
            format!("{} does not exist", source.display()),
        )),
        Err(e) => Some(finding(format!("ERROR:{}", e), e)),
    }
}

/// Re-hash a written template and compare it to the lock.
pub fn check_template_drift(out_dir: &Path, file: &str, expected_hash: &str) -> Option<DriftFinding> {
    let path = out_dir.join(file);
    let finding = |actual: String, detail: String| DriftFinding {
        target: file.to_string(),
        kind: DriftKind::Template,
        expected_hash: expected_hash.to_string(),
        actual_hash: actual,
        detail,
    };
    if !path.exists() {
        return Some(finding(
            "MISSING".to_string(),
            format!("{} does not exist", path.display()),
        ));
    }
    let actual = hasher::hash_file(&path).unwrap_or_else(|e| format!("ERROR:{}", e));
    (actual != expected_hash).then(|| finding(actual, format!("{} modified after synth", path.display())))
}

/// Check every asset and template recorded in a lock.
pub fn detect_drift(lock: &StackLock, out_dir: &Path) -> Vec<DriftFinding> {
    let mut findings: Vec<DriftFinding> = lock
        .assets
        .iter()
        .filter_map(|(id, al)| check_asset_drift(id, al))
        .collect();
    findings.extend(
        lock.templates
            .iter()
            .filter_map(|(file, hash)| check_template_drift(out_dir, file, hash)),
    );
    findings
}
