//! Identity, labels and styling for map features.
//!
//! The map itself is drawn by an external library; this module only tells it
//! which record a polygon belongs to and how to paint it.

use crate::visits::VisitRecord;
use serde::Serialize;
use serde_json::{Map, Value};

/// Property names consulted, in order, to find a feature's id.
pub const FEATURE_ID_FIELDS: [&str; 7] = [
    "N03_007", "N03_003", "N03_004", "id", "code", "CITYCODE", "name",
];

const FEATURE_NAME_FIELDS: [&str; 4] = ["N03_004", "N03_003", "name", "NAME"];

pub const UNNAMED: &str = "Unnamed";

const VISITED_COLOR: &str = "#d9534f";
const UNVISITED_COLOR: &str = "#3388ff";

fn property_text(properties: &Map<String, Value>, field: &str) -> Option<String> {
    match properties.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty value among `FEATURE_ID_FIELDS`, or `None`.
pub fn feature_id(properties: &Map<String, Value>) -> Option<String> {
    FEATURE_ID_FIELDS
        .iter()
        .find_map(|field| property_text(properties, field))
}

pub fn feature_name(properties: &Map<String, Value>) -> String {
    if properties.get("_country").and_then(Value::as_str) == Some("cn") {
        if let Some(fullname) = property_text(properties, "fullname") {
            return fullname;
        }
    }
    FEATURE_NAME_FIELDS
        .iter()
        .find_map(|field| property_text(properties, field))
        .unwrap_or_else(|| UNNAMED.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStyle {
    pub color: &'static str,
    pub weight: u32,
    pub fill_color: &'static str,
    pub fill_opacity: f64,
    pub opacity: f64,
}

pub fn style_for(visit: Option<&VisitRecord>) -> FeatureStyle {
    let visited = visit.is_some_and(VisitRecord::is_marked);
    let color = if visited { VISITED_COLOR } else { UNVISITED_COLOR };
    FeatureStyle {
        color,
        weight: 1,
        fill_color: color,
        fill_opacity: if visited { 0.6 } else { 0.12 },
        opacity: 1.0,
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Tooltip markup shown while hovering a feature.
pub fn hover_summary(properties: &Map<String, Value>, visit: Option<&VisitRecord>) -> String {
    let mut content = format!("<b>{}</b><br/>", escape_html(&feature_name(properties)));
    let dates = visit.map(VisitRecord::visit_dates).unwrap_or_default();
    if !dates.is_empty() {
        content.push_str(&format!("Visited: {}<br/>", escape_html(&dates.join(", "))));
    } else if visit.is_some_and(VisitRecord::is_marked) {
        content.push_str("Visited<br/>");
    } else {
        content.push_str("Not visited<br/>");
    }
    if let Some(visit) = visit {
        content.push_str(&escape_html(&visit.note).replace('\n', "<br/>"));
    }
    content
}
