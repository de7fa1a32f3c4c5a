use crate::error::VisitAtlasError;
use crate::feature::{feature_id, feature_name};
use crate::visits::VisitStore;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFeature {
    pub id: String,
    pub name: String,
}

/// Values the edit panel is filled with when a feature is clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPrefill {
    pub title: String,
    pub name: String,
    pub dates: String,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Saved,
    Deleted,
}

impl EditOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EditOutcome::Saved => "已保存",
            EditOutcome::Deleted => "已删除",
        }
    }
}

pub fn save_failure_message(err: &VisitAtlasError) -> String {
    format!(
        "保存失败: {}\n请确认已通过 `visit-atlas serve` 启动本地服务器。",
        err
    )
}

/// Split a comma-separated date field, dropping blanks.
pub fn parse_dates(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One editing session: the visit map loaded at start plus the feature
/// currently open in the edit panel.
#[derive(Debug, Default)]
pub struct EditorSession {
    visits: VisitStore,
    current: Option<SelectedFeature>,
}

impl EditorSession {
    pub fn new(visits: VisitStore) -> Self {
        Self {
            visits,
            current: None,
        }
    }

    pub fn visits(&self) -> &VisitStore {
        &self.visits
    }

    pub fn current(&self) -> Option<&SelectedFeature> {
        self.current.as_ref()
    }

    /// Open the feature with these map properties for editing.
    pub fn select(&mut self, properties: &Map<String, Value>) -> crate::Result<FormPrefill> {
        let id = feature_id(properties).ok_or_else(|| {
            VisitAtlasError::Validation("feature has no identifier".to_string())
        })?;
        Ok(self.select_id(&id, &feature_name(properties)))
    }

    pub fn select_id(&mut self, id: &str, feature_name: &str) -> FormPrefill {
        let visit = self.visits.get(id).cloned().unwrap_or_default();
        let name = if visit.name.is_empty() {
            feature_name.to_string()
        } else {
            visit.name.clone()
        };
        self.current = Some(SelectedFeature {
            id: id.to_string(),
            name: feature_name.to_string(),
        });
        FormPrefill {
            title: format!("{} ({})", feature_name, id),
            name,
            dates: visit.visit_dates().join(","),
            note: visit.note,
        }
    }

    /// Apply the panel's fields to the selected feature. Clearing both dates
    /// and note removes the record; other fields on the record are kept.
    /// Returns `None` when nothing is selected.
    pub fn apply_edit(&mut self, name: &str, dates: &str, note: &str) -> Option<EditOutcome> {
        let id = self.current.as_ref()?.id.clone();
        let mut record = self.visits.get(&id).cloned().unwrap_or_default();
        record.name = name.trim().to_string();
        record.dates = parse_dates(dates);
        record.note = note.trim().to_string();
        record.date = None;
        if self.visits.upsert(&id, record) {
            Some(EditOutcome::Saved)
        } else {
            Some(EditOutcome::Deleted)
        }
    }

    /// The full replacement document sent to the save endpoint.
    pub fn document(&self) -> crate::Result<Map<String, Value>> {
        self.visits.to_document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visits::VisitRecord;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parse_dates() {
        assert_eq!(
            parse_dates(" 2023-05-01, ,2023-06-02 ,"),
            vec!["2023-05-01".to_string(), "2023-06-02".to_string()]
        );
        assert!(parse_dates("  ").is_empty());
    }

    #[test]
    fn test_select_prefills_from_feature() {
        let mut session = EditorSession::default();
        let prefill = session
            .select(&props(json!({"N03_007": "13101", "N03_004": "千代田区"})))
            .unwrap();
        assert_eq!(prefill.title, "千代田区 (13101)");
        assert_eq!(prefill.name, "千代田区");
        assert_eq!(prefill.dates, "");
        assert_eq!(session.current().unwrap().id, "13101");
    }

    #[test]
    fn test_select_prefills_from_record() {
        let mut visits = VisitStore::new();
        visits.upsert(
            "13101",
            VisitRecord::new("Chiyoda", vec!["2023-05-01".into(), "2023-06-02".into()], "nice"),
        );
        let mut session = EditorSession::new(visits);
        let prefill = session.select_id("13101", "千代田区");
        assert_eq!(prefill.name, "Chiyoda");
        assert_eq!(prefill.dates, "2023-05-01,2023-06-02");
        assert_eq!(prefill.note, "nice");
    }

    #[test]
    fn test_select_without_id_fails() {
        let mut session = EditorSession::default();
        assert!(session.select(&props(json!({"NAME": "x"}))).is_err());
        assert!(session.current().is_none());
    }

    #[test]
    fn test_apply_edit_saves_then_deletes() {
        let mut session = EditorSession::default();
        assert_eq!(session.apply_edit("x", "2020-01-01", ""), None);

        session.select_id("13101", "千代田区");
        let outcome = session
            .apply_edit(" Chiyoda ", "2023-05-01, 2023-06-02", " nice ")
            .unwrap();
        assert_eq!(outcome, EditOutcome::Saved);
        assert_eq!(outcome.label(), "已保存");
        assert_eq!(
            Value::Object(session.document().unwrap()),
            json!({"13101": {"name": "Chiyoda", "dates": ["2023-05-01", "2023-06-02"], "note": "nice"}})
        );

        let outcome = session.apply_edit("Chiyoda", " , ", "   ").unwrap();
        assert_eq!(outcome, EditOutcome::Deleted);
        assert_eq!(outcome.label(), "已删除");
        assert!(session.visits().is_empty());
    }

    #[test]
    fn test_apply_edit_keeps_hand_added_fields() {
        let visits = VisitStore::from_document(props(json!({
            "13101": {"name": "Chiyoda", "date": "2019-04-01", "tags": ["onsen"]}
        })));
        let mut session = EditorSession::new(visits);
        assert_eq!(session.select_id("13101", "千代田区").dates, "2019-04-01");

        session.apply_edit("Chiyoda", "2019-04-01, 2023-05-01", "").unwrap();
        assert_eq!(
            Value::Object(session.document().unwrap()),
            json!({"13101": {
                "name": "Chiyoda",
                "dates": ["2019-04-01", "2023-05-01"],
                "note": "",
                "tags": ["onsen"]
            }})
        );
    }

    #[test]
    fn test_failure_message_mentions_server() {
        let message = save_failure_message(&VisitAtlasError::Forbidden);
        assert!(message.starts_with("保存失败: Forbidden"));
        assert!(message.contains("visit-atlas serve"));
    }
}
