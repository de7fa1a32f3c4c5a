//! Dataset manifest and boundary-file format detection.

use crate::error::VisitAtlasError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub const GEO_DIR: &str = "geojson";
pub const MANIFEST_FILE: &str = "geojson/manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoSource {
    pub id: String,
    pub name: String,
    /// Path relative to the project root, always under `geojson/`.
    pub file: String,
}

impl GeoSource {
    fn new(id: &str, name: &str, file: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            file: format!("{}/{}", GEO_DIR, file),
        }
    }
}

// Manifest entries are loose: either of id/name may be missing, and the file
// may be spelled `file` or `path`.
#[derive(Debug, Deserialize)]
struct RawEntry {
    id: Option<String>,
    name: Option<String>,
    file: Option<String>,
    path: Option<String>,
}

impl RawEntry {
    fn into_source(self) -> Option<GeoSource> {
        let id = non_empty(self.id.clone()).or_else(|| non_empty(self.name.clone()))?;
        let name = non_empty(self.name).unwrap_or_else(|| id.clone());
        let file = non_empty(self.file).or_else(|| non_empty(self.path))?;
        Some(GeoSource::new(&id, &name, &file))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoManifest {
    pub sources: Vec<GeoSource>,
    /// False when the built-in list was used.
    pub from_file: bool,
}

impl GeoManifest {
    pub fn fallback() -> Self {
        Self {
            sources: vec![
                GeoSource::new("jp", "日本", "jp_municipalities.topojson"),
                GeoSource::new("cn", "中国", "cn_municipalities.topojson"),
            ],
            from_file: false,
        }
    }

    /// Parse a manifest document; `None` unless it is a JSON array.
    pub fn parse(value: &Value) -> Option<Self> {
        let Value::Array(items) = value else {
            return None;
        };
        let sources = items
            .iter()
            .filter_map(|item| serde_json::from_value::<RawEntry>(item.clone()).ok())
            .filter_map(RawEntry::into_source)
            .collect();
        Some(Self {
            sources,
            from_file: true,
        })
    }

    /// Read `geojson/manifest.json` under `root`, falling back to the
    /// built-in list when it is missing or unusable.
    pub fn load(root: &Path) -> Self {
        let path = root.join(MANIFEST_FILE);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                debug!("No manifest at {} ({}), using defaults", path.display(), e);
                return Self::fallback();
            }
        };
        match serde_json::from_str::<Value>(&data) {
            Ok(value) => Self::parse(&value).unwrap_or_else(|| {
                warn!("{} is not a JSON array, using defaults", path.display());
                Self::fallback()
            }),
            Err(e) => {
                warn!("Could not parse {}: {}", path.display(), e);
                Self::fallback()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoFormat {
    /// TopoJSON; the client expands `object` into polygons.
    Topology { object: String },
    FeatureCollection,
    Feature,
}

impl GeoFormat {
    pub fn detect(value: &Value) -> crate::Result<Self> {
        match value.get("type").and_then(Value::as_str) {
            Some("Topology") => {
                let object = value
                    .get("objects")
                    .and_then(Value::as_object)
                    .and_then(|objects| objects.keys().next().cloned())
                    .ok_or_else(|| VisitAtlasError::GeoData("TopoJSON has no objects".to_string()))?;
                Ok(GeoFormat::Topology { object })
            }
            Some("FeatureCollection") => Ok(GeoFormat::FeatureCollection),
            Some("Feature") => Ok(GeoFormat::Feature),
            _ if value.get("features").is_some() => Ok(GeoFormat::FeatureCollection),
            other => Err(VisitAtlasError::GeoData(format!(
                "unrecognized boundary document type {:?}",
                other.unwrap_or("<none>")
            ))),
        }
    }
}
