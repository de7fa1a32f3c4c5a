//! Copy the deployable files into an output directory.

use crate::error::VisitAtlasError;
use crate::guard;
use crate::manifest::{GeoFormat, GeoManifest, GEO_DIR, MANIFEST_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const STATIC_FILES: [&str; 6] = [
    "index.html",
    "src/main.js",
    "geojson/jp_municipalities.topojson",
    "geojson/jp_municipalities.json",
    "geojson/jp_municipalities.geojson",
    "geojson/jp_sample.geojson",
];

#[derive(Debug, Clone, Default)]
pub struct StageReport {
    pub copied: Vec<PathBuf>,
    /// Optional files that could not be copied, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Files to stage, relative to the project root, without duplicates.
pub fn stage_plan(root: &Path, store: &Path) -> Vec<PathBuf> {
    let mut plan: Vec<PathBuf> = vec![store.to_path_buf()];
    plan.extend(STATIC_FILES.iter().map(PathBuf::from));
    plan.push(PathBuf::from(MANIFEST_FILE));
    plan.extend(
        GeoManifest::load(root)
            .sources
            .into_iter()
            .map(|source| PathBuf::from(source.file)),
    );

    let mut seen = std::collections::HashSet::new();
    plan.retain(|p| seen.insert(p.clone()));
    plan
}

/// Copy every planned file from `root` to `out`. Missing files and paths
/// that would leave `root` or `out` are reported and skipped; only failing to
/// create `out` is an error.
pub fn stage(root: &Path, out: &Path, store: &Path) -> crate::Result<StageReport> {
    fs::create_dir_all(out).map_err(|source| VisitAtlasError::Write {
        path: out.to_path_buf(),
        source,
    })?;

    let mut report = StageReport::default();
    for rel in stage_plan(root, store) {
        if !guard::is_contained(&rel) {
            report
                .skipped
                .push((rel, "path leaves the project directory".to_string()));
            continue;
        }
        match copy_one(&root.join(&rel), &out.join(&rel)) {
            Ok(()) => {
                if is_boundary_file(&rel) {
                    check_boundary(&out.join(&rel));
                }
                report.copied.push(rel);
            }
            Err(e) => report.skipped.push((rel, e.to_string())),
        }
    }

    for (rel, reason) in &report.skipped {
        warn!("Skipped {}: {}", rel.display(), reason);
    }
    info!(
        "Staged {} files to {}",
        report.copied.len(),
        out.display()
    );
    Ok(report)
}

fn is_boundary_file(rel: &Path) -> bool {
    rel.starts_with(GEO_DIR) && rel != Path::new(MANIFEST_FILE)
}

// Staging still succeeds with a broken boundary file; the map page reports
// it when it fails to draw.
fn check_boundary(path: &Path) {
    let parsed = fs::read_to_string(path)
        .map_err(VisitAtlasError::from)
        .and_then(|data| Ok(serde_json::from_str::<serde_json::Value>(&data)?))
        .and_then(|value| GeoFormat::detect(&value));
    match parsed {
        Ok(format) => debug!("{} is {:?}", path.display(), format),
        Err(e) => warn!("{} does not look like boundary data: {}", path.display(), e),
    }
}

fn copy_one(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}
