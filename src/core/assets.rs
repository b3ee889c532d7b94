//! SG-006: Code assets: path resolution, SHA-256 fingerprints, zip staging.
//!
//! Directories are zipped with sorted entries and a fixed timestamp so the
//! same source always produces the same archive bytes and object key.
//! Existing `.zip`/`.jar` archives are staged as-is.

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// How an asset source is turned into a deployable archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// Directory zipped on staging
    Directory,
    /// Prebuilt archive copied as-is
    Archive,
    /// Single file zipped as the only entry
    File,
}

impl std::fmt::Display for Packaging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory => write!(f, "directory"),
            Self::Archive => write!(f, "archive"),
            Self::File => write!(f, "file"),
        }
    }
}

/// A code asset referenced by a layer or function.
#[derive(Debug, Clone)]
pub struct AssetSource {
    /// `<nested>/<resource>` path of the owning resource
    pub id: String,
    pub path: PathBuf,
    pub packaging: Packaging,
    pub exclude: Vec<String>,
    /// Hex SHA-256 of the source contents
    pub fingerprint: String,
}

impl AssetSource {
    /// Destination object key in the asset bucket.
    pub fn object_key(&self) -> String {
        format!("{}.zip", self.fingerprint)
    }
}

/// Resolve an asset location relative to the definition file's directory.
pub fn resolve_asset_path(base_dir: &Path, code: &str) -> PathBuf {
    let p = Path::new(code);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Locate and fingerprint an asset without writing anything.
pub fn inspect(id: &str, base_dir: &Path, code: &str, exclude: &[String]) -> Result<AssetSource, String> {
    let path = resolve_asset_path(base_dir, code);
    let meta = std::fs::metadata(&path)
        .map_err(|e| format!("asset for '{}' not found at {}: {}", id, path.display(), e))?;
    let packaging = if meta.is_dir() {
        Packaging::Directory
    } else if is_archive(&path) {
        Packaging::Archive
    } else {
        Packaging::File
    };
    let fingerprint = fingerprint(&path, packaging, exclude)?;
    Ok(AssetSource {
        id: id.to_string(),
        path,
        packaging,
        exclude: exclude.to_vec(),
        fingerprint,
    })
}

fn is_archive(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("zip" | "jar")
    )
}

/// SHA-256 fingerprint of an asset source. Covers the packaging kind, so
/// the same bytes packaged differently get different keys. Directory
/// fingerprints cover relative paths and contents of every non-excluded
/// file; single files also cover the entry name they are zipped under.
pub fn fingerprint(path: &Path, packaging: Packaging, exclude: &[String]) -> Result<String, String> {
    let mut hasher = Sha256::new();
    hasher.update(packaging.to_string().as_bytes());
    hasher.update(b"\0");
    match packaging {
        Packaging::Directory => {
            for (rel, file) in collect_files(path, exclude)? {
                let bytes = std::fs::read(&file)
                    .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
                hasher.update(rel.as_bytes());
                hasher.update(b"\0");
                hasher.update(&bytes);
                hasher.update(b"\0");
            }
        }
        Packaging::Archive | Packaging::File => {
            if packaging == Packaging::File {
                hasher.update(entry_name(path)?.as_bytes());
                hasher.update(b"\0");
            }
            let bytes =
                std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            hasher.update(&bytes);
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Write the asset archive into `assets_dir`. Returns the staged path and its size.
/// An archive already staged under the same key is left untouched.
pub fn stage(asset: &AssetSource, assets_dir: &Path) -> Result<(PathBuf, u64), String> {
    std::fs::create_dir_all(assets_dir)
        .map_err(|e| format!("cannot create dir {}: {}", assets_dir.display(), e))?;
    let dest = assets_dir.join(asset.object_key());
    if !dest.exists() {
        let tmp = dest.with_extension("zip.tmp");
        match asset.packaging {
            Packaging::Archive => {
                std::fs::copy(&asset.path, &tmp).map_err(|e| {
                    format!("cannot copy {} → {}: {}", asset.path.display(), tmp.display(), e)
                })?;
            }
            Packaging::Directory => {
                let entries = collect_files(&asset.path, &asset.exclude)?;
                write_zip(&tmp, &entries)?;
            }
            Packaging::File => {
                write_zip(&tmp, &[(entry_name(&asset.path)?, asset.path.clone())])?;
            }
        }
        std::fs::rename(&tmp, &dest).map_err(|e| {
            format!("cannot rename {} → {}: {}", tmp.display(), dest.display(), e)
        })?;
        tracing::debug!(asset = %asset.id, key = %asset.object_key(), "asset staged");
    }
    let size = std::fs::metadata(&dest)
        .map_err(|e| format!("cannot stat {}: {}", dest.display(), e))?
        .len();
    Ok((dest, size))
}

/// Archive entry name of a single-file asset.
fn entry_name(path: &Path) -> Result<String, String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| format!("asset {} has no file name", path.display()))
}

fn write_zip(dest: &Path, entries: &[(String, PathBuf)]) -> Result<(), String> {
    let file = std::fs::File::create(dest)
        .map_err(|e| format!("cannot create {}: {}", dest.display(), e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644);
    for (rel, path) in entries {
        let bytes =
            std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        zip.start_file(rel.as_str(), options)
            .map_err(|e| format!("zip error on {}: {}", rel, e))?;
        zip.write_all(&bytes)
            .map_err(|e| format!("zip write error on {}: {}", rel, e))?;
    }
    zip.finish()
        .map_err(|e| format!("cannot finish {}: {}", dest.display(), e))?;
    Ok(())
}

/// Sorted walk of regular files under `root`, skipping symlinks and excluded paths.
/// Relative paths use `/` separators.
pub fn collect_files(root: &Path, exclude: &[String]) -> Result<Vec<(String, PathBuf)>, String> {
    let patterns = exclude
        .iter()
        .map(|p| glob::Pattern::new(p).map_err(|e| format!("invalid exclude pattern '{}': {}", p, e)))
        .collect::<Result<Vec<_>, _>>()?;

    fn walk(
        current: &Path,
        prefix: &str,
        patterns: &[glob::Pattern],
        out: &mut Vec<(String, PathBuf)>,
    ) -> Result<(), String> {
        let read_dir = std::fs::read_dir(current)
            .map_err(|e| format!("cannot read dir {}: {}", current.display(), e))?;
        let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let ft = entry
                .file_type()
                .map_err(|e| format!("stat error: {}", e))?;
            if ft.is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            if patterns.iter().any(|p| p.matches(&rel) || p.matches(&name)) {
                continue;
            }
            if ft.is_file() {
                out.push((rel, entry.path()));
            } else if ft.is_dir() {
                walk(&entry.path(), &rel, patterns, out)?;
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(root, "", &patterns, &mut out)?;
    Ok(out)
}
