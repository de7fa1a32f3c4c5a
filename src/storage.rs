use crate::backup::{BackupClock, BackupRotation, PruneReport};
use crate::error::VisitAtlasError;
use crate::visits::{json_kind, strip_empty_records, VisitStore};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct SaveOutcome {
    /// Backup of the previous store, `None` when there was no store yet.
    pub backup: Option<PathBuf>,
    /// Keys dropped from the document because their records were empty.
    pub dropped: Vec<String>,
    pub pruned: PruneReport,
}

/// File-backed visit store with backup rotation.
///
/// Holds no cached copy of the data: every call reads or replaces what is on
/// disk. Saves are serialized through `save_lock`, so concurrent requests
/// never interleave their backup, write and prune steps.
pub struct VisitFileStore {
    path: PathBuf,
    rotation: BackupRotation,
    save_lock: Mutex<BackupClock>,
}

impl VisitFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_rotation(path, BackupRotation::default())
    }

    pub fn with_rotation(path: impl Into<PathBuf>, rotation: BackupRotation) -> Self {
        Self {
            path: path.into(),
            rotation,
            save_lock: Mutex::new(BackupClock::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rotation(&self) -> &BackupRotation {
        &self.rotation
    }

    /// Raw document as stored. A missing file reads as `{}`.
    pub fn read_document(&self) -> crate::Result<Map<String, Value>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<Value>(&data)? {
            Value::Object(map) => Ok(map),
            other => Err(VisitAtlasError::Storage(format!(
                "{} holds a JSON {}, expected an object",
                self.path.display(),
                json_kind(&other)
            ))),
        }
    }

    /// Typed view of the store. Entries that are not visit records are kept
    /// aside and written back by `save_store`.
    pub fn load(&self) -> crate::Result<VisitStore> {
        Ok(VisitStore::from_document(self.read_document()?))
    }

    /// Validate a request body and replace the store with it.
    pub fn save_bytes(&self, body: &[u8]) -> crate::Result<SaveOutcome> {
        let document = parse_document(body)?;
        self.save_document(document)
    }

    pub fn save_store(&self, store: &VisitStore) -> crate::Result<SaveOutcome> {
        self.save_document(store.to_document()?)
    }

    /// Replace the whole store: backup, then overwrite, then prune.
    pub fn save_document(&self, mut document: Map<String, Value>) -> crate::Result<SaveOutcome> {
        let dropped = strip_empty_records(&mut document);
        let data = serde_json::to_string_pretty(&Value::Object(document))?;

        let mut clock = self
            .save_lock
            .lock()
            .map_err(|e| VisitAtlasError::Storage(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| VisitAtlasError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let backup = self.rotation.snapshot(&self.path, &mut clock)?;
        atomic_write(&self.path, data.as_bytes())?;
        let pruned = self.rotation.prune(&self.path);
        drop(clock);

        pruned.log();
        match &backup {
            Some(path) => info!(
                "Saved {}; backup at {}",
                self.path.display(),
                path.display()
            ),
            None => info!("Saved {}; no previous store to back up", self.path.display()),
        }

        Ok(SaveOutcome {
            backup,
            dropped,
            pruned,
        })
    }
}

/// Parse a replacement document. Anything but a JSON object is rejected.
pub fn parse_document(body: &[u8]) -> crate::Result<Map<String, Value>> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| VisitAtlasError::Validation(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(VisitAtlasError::Validation(format!(
            "Invalid document: expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

// Write to a temporary sibling and rename it over the target, so a crash
// mid-write never leaves a truncated store behind.
fn atomic_write(path: &Path, bytes: &[u8]) -> crate::Result<()> {
    use rand::{thread_rng, Rng};

    let write_err = |source| VisitAtlasError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VisitAtlasError::Storage(format!("Invalid store path: {}", path.display())))?;
    let suffix: u64 = thread_rng().gen();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, suffix));

    fs::write(&tmp, bytes).map_err(write_err)?;
    if let Err(source) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(source));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visits::VisitRecord;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_at(dir: &TempDir) -> VisitFileStore {
        VisitFileStore::new(dir.path().join("data").join("visits.json"))
    }

    fn backups(store: &VisitFileStore) -> Vec<PathBuf> {
        store
            .rotation()
            .list(store.path())
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect()
    }

    fn stored_value(store: &VisitFileStore) -> Value {
        serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap()
    }

    #[test]
    fn test_save_writes_pretty_document() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        let body = br#"{"13101":{"name":"Chiyoda","dates":["2023-05-01"],"note":"nice"}}"#;

        let outcome = store.save_bytes(body).unwrap();
        assert!(outcome.backup.is_none());

        let text = fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("\n  \"13101\": {\n    \"name\": \"Chiyoda\""));
        assert_eq!(
            stored_value(&store),
            json!({"13101": {"name": "Chiyoda", "dates": ["2023-05-01"], "note": "nice"}})
        );
    }

    #[test]
    fn test_rejects_non_objects_without_touching_store() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        store.save_bytes(b"{}").unwrap();
        let before = fs::read_to_string(store.path()).unwrap();

        let bodies: [&[u8]; 7] = [b"[]", b"\"text\"", b"12", b"null", b"true", b"{not json", b""];
        for body in bodies {
            let err = store.save_bytes(body).unwrap_err();
            assert!(matches!(err, VisitAtlasError::Validation(_)), "{:?}", body);
        }

        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
        assert!(backups(&store).is_empty());
    }

    #[test]
    fn test_backup_holds_previous_content() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{}").unwrap();

        let outcome = store
            .save_bytes(br#"{"13101":{"name":"Chiyoda","dates":["2023-05-01","2023-06-02"],"note":"nice"}}"#)
            .unwrap();

        let backup = outcome.backup.unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{}");
        assert_eq!(backups(&store), vec![backup]);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.get("13101"),
            Some(&VisitRecord::new(
                "Chiyoda",
                vec!["2023-05-01".into(), "2023-06-02".into()],
                "nice"
            ))
        );
    }

    #[test]
    fn test_four_saves_keep_three_backups() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), "{}").unwrap();

        let mut created = Vec::new();
        for i in 0..4 {
            let body = format!(r#"{{"{}":{{"dates":["2023-01-0{}"]}}}}"#, 13100 + i, i + 1);
            created.push(store.save_bytes(body.as_bytes()).unwrap().backup.unwrap());
        }

        let remaining = backups(&store);
        assert_eq!(remaining.len(), 3);
        assert!(!created[0].exists());
        assert_eq!(remaining, created[1..].to_vec());
    }

    #[test]
    fn test_repeated_save_is_idempotent() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        let body = br#"{"01101":{"name":"Sapporo","dates":["2022-02-02"],"note":""}}"#;

        store.save_bytes(body).unwrap();
        let first = fs::read_to_string(store.path()).unwrap();
        for _ in 0..5 {
            store.save_bytes(body).unwrap();
        }
        assert_eq!(fs::read_to_string(store.path()).unwrap(), first);
        assert!(backups(&store).len() <= 3);
    }

    #[test]
    fn test_empty_record_equals_omitted_key() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        store
            .save_bytes(br#"{"13101":{"name":"Chiyoda","dates":["2020-01-01"],"note":""}}"#)
            .unwrap();

        let outcome = store
            .save_bytes(br#"{"13101":{"name":"Chiyoda","dates":[],"note":""}}"#)
            .unwrap();
        assert_eq!(outcome.dropped, vec!["13101".to_string()]);
        let emptied = stored_value(&store);

        store
            .save_bytes(br#"{"13101":{"name":"Chiyoda","dates":["2020-01-01"],"note":""}}"#)
            .unwrap();
        store.save_bytes(b"{}").unwrap();
        let omitted = stored_value(&store);

        assert_eq!(emptied, json!({}));
        assert_eq!(emptied, omitted);
    }

    #[test]
    fn test_failed_backup_keeps_store() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("visits.json");
        fs::create_dir(&path).unwrap();
        let store = VisitFileStore::new(&path);

        let err = store.save_bytes(b"{}").unwrap_err();
        assert!(matches!(err, VisitAtlasError::Backup { .. }));
        assert!(path.is_dir());
    }

    #[test]
    fn test_load_missing_store_is_empty() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_saves_respect_bound() {
        let tmp_dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(store_at(&tmp_dir));
        store.save_bytes(b"{}").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let body = format!(r#"{{"id{}":{{"note":"n{}"}}}}"#, i, i);
                    store.save_bytes(body.as_bytes()).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().backup.is_some());
        }

        assert_eq!(backups(&store).len(), 3);
        let doc = store.read_document().unwrap();
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_failed_prune_does_not_fail_save() {
        let tmp_dir = TempDir::new().unwrap();
        let rotation = BackupRotation::new(1)
            .with_remover(|_| Err(std::io::Error::new(ErrorKind::PermissionDenied, "locked")));
        let store = VisitFileStore::with_rotation(tmp_dir.path().join("visits.json"), rotation);
        store.save_bytes(b"{}").unwrap();
        store.save_bytes(br#"{"a":{"note":"1"}}"#).unwrap();

        let outcome = store.save_bytes(br#"{"b":{"note":"2"}}"#).unwrap();
        assert!(outcome.backup.is_some());
        assert_eq!(outcome.pruned.failures.len(), 1);
        assert!(outcome.pruned.removed.is_empty());
        assert_eq!(stored_value(&store), json!({"b": {"note": "2"}}));
        assert_eq!(backups(&store).len(), 2);
    }

    #[test]
    fn test_load_accepts_whatever_save_accepted() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        store
            .save_bytes(br#"{"13101":{"name":null,"dates":["2020-01-01"],"note":"x"},"13102":7}"#)
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("13101").unwrap().name, "");
        assert_eq!(loaded.unrecognized().count(), 1);
    }

    #[test]
    fn test_rewrite_keeps_unknown_fields() {
        let tmp_dir = TempDir::new().unwrap();
        let store = store_at(&tmp_dir);
        store
            .save_bytes(br#"{"13101":{"dates":["2020-01-01"],"tags":["onsen"]},"13102":7}"#)
            .unwrap();

        let mut visits = store.load().unwrap();
        visits.upsert("13103", VisitRecord::new("", vec![], "new"));
        store.save_store(&visits).unwrap();

        let stored = stored_value(&store);
        assert_eq!(stored["13101"]["tags"], json!(["onsen"]));
        assert_eq!(stored["13101"]["dates"], json!(["2020-01-01"]));
        assert_eq!(stored["13102"], json!(7));
        assert_eq!(stored["13103"]["note"], "new");
    }
}
