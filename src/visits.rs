use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dates: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
    /// Older store files carry a single `date` instead of `dates`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Hand-added fields, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Hand-edited stores sometimes say `"note": null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl VisitRecord {
    pub fn new(name: &str, dates: Vec<String>, note: &str) -> Self {
        Self {
            name: name.to_string(),
            dates,
            note: note.to_string(),
            date: None,
            extra: Map::new(),
        }
    }

    /// Visit dates, falling back to the legacy single `date` field.
    pub fn visit_dates(&self) -> Vec<&str> {
        if !self.dates.is_empty() {
            return self.dates.iter().map(String::as_str).collect();
        }
        match self.date.as_deref() {
            Some(date) if !date.trim().is_empty() => vec![date],
            _ => Vec::new(),
        }
    }

    /// Only dates or a note establish a visit; a name alone does not.
    pub fn has_content(&self) -> bool {
        !self.visit_dates().is_empty() || !self.note.trim().is_empty()
    }

    /// Looser check used for map colouring, where a bare name still counts.
    pub fn is_marked(&self) -> bool {
        self.has_content() || !self.name.trim().is_empty()
    }
}

/// In-memory view of the store, keyed by feature id.
///
/// Entries that do not read as a visit record are kept verbatim in
/// `unrecognized` so rewriting the store never loses them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitStore {
    records: BTreeMap<String, VisitRecord>,
    unrecognized: BTreeMap<String, Value>,
}

impl VisitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(document: Map<String, Value>) -> Self {
        let mut store = Self::new();
        for (id, value) in document {
            match serde_json::from_value::<VisitRecord>(value.clone()) {
                Ok(record) => {
                    store.records.insert(id, record);
                }
                Err(e) => {
                    warn!("Keeping entry {} as is, not a visit record: {}", id, e);
                    store.unrecognized.insert(id, value);
                }
            }
        }
        store
    }

    pub fn get(&self, id: &str) -> Option<&VisitRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Store `record` under `id`, or drop the key when the record is empty.
    /// Returns `true` when the key is present afterwards.
    pub fn upsert(&mut self, id: &str, record: VisitRecord) -> bool {
        self.unrecognized.remove(id);
        if record.has_content() {
            self.records.insert(id.to_string(), record);
            true
        } else {
            self.records.remove(id);
            false
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<VisitRecord> {
        self.unrecognized.remove(id);
        self.records.remove(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VisitRecord)> {
        self.records.iter()
    }

    pub fn unrecognized(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.unrecognized.iter()
    }

    /// Records and kept entries merged back into one document, keyed in order.
    pub fn to_document(&self) -> crate::Result<Map<String, Value>> {
        let mut entries: BTreeMap<&String, Value> = BTreeMap::new();
        for (id, record) in &self.records {
            entries.insert(id, serde_json::to_value(record)?);
        }
        for (id, value) in &self.unrecognized {
            entries.insert(id, value.clone());
        }
        Ok(entries
            .into_iter()
            .map(|(id, value)| (id.clone(), value))
            .collect())
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// True for a record-shaped object with no dates, no legacy date and no note.
///
/// Non-object values are never considered empty; the store keeps them as
/// written.
pub fn is_empty_record(value: &Value) -> bool {
    let Value::Object(fields) = value else {
        return false;
    };
    let no_dates = match fields.get("dates") {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    };
    no_dates && is_blank(fields.get("date")) && is_blank(fields.get("note"))
}

/// Drop logically deleted records from a replacement document. Returns the
/// removed keys.
pub fn strip_empty_records(document: &mut Map<String, Value>) -> Vec<String> {
    let removed: Vec<String> = document
        .iter()
        .filter(|(_, value)| is_empty_record(value))
        .map(|(key, _)| key.clone())
        .collect();
    document.retain(|_, value| !is_empty_record(value));
    removed
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
