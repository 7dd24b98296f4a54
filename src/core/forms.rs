use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use awc::http::header;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{core::hosting::http_client, error::AppError};

/// Spam trap field, never recorded.
pub const HONEYPOT_FIELD: &str = "_gotcha";
pub const SUCCESS_MESSAGE: &str = "Thanks! We'll get back to you within 24 hours.";
const REJECTED_MESSAGE: &str = "Something went wrong. Please try again.";
const UNREACHABLE_MESSAGE: &str = "Unable to send the form right now.";

pub type Fields = Vec<(String, String)>;

#[derive(Deserialize)]
struct RelayError {
    error: Option<String>,
}

/// Forwards public forms to the external form-processing service.
pub struct FormRelay {
    endpoint: String,
}

impl FormRelay {
    pub fn new(endpoint: &str) -> Self {
        FormRelay {
            endpoint: endpoint.to_string(),
        }
    }

    pub async fn submit(&self, fields: &[(String, String)]) -> Result<(), AppError> {
        let client = http_client();
        let mut response = client
            .post(&self.endpoint)
            .insert_header((header::ACCEPT, "application/json"))
            .send_form(&fields)
            .await
            .map_err(|error| {
                warn!("Form endpoint unreachable: {}", error);
                AppError::Form(UNREACHABLE_MESSAGE.to_string())
            })?;

        if response.status().is_success() {
            info!("Form relayed ({} fields)", fields.len());
            return Ok(());
        }

        let status = response.status();
        let message = response
            .json::<RelayError>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| REJECTED_MESSAGE.to_string());
        warn!("Form endpoint answered {}: {}", status, message);
        Err(AppError::Form(message))
    }
}

/// Local trail of submitted forms, one JSON array per store key.
pub struct AuditLog {
    dir: PathBuf,
    writing: Mutex<()>,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        AuditLog {
            dir: dir.into(),
            writing: Mutex::new(()),
        }
    }

    /// Appends a submission and returns the number of stored entries. A
    /// trail that cannot be read as an array is left untouched.
    pub fn record(&self, store: &str, fields: &[(String, String)]) -> Result<usize, AppError> {
        let _writing = self.writing.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.entries(store)?;

        let mut entry: Map<String, Value> = fields
            .iter()
            .filter(|(key, _)| key != HONEYPOT_FIELD)
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        entry.insert(
            "createdAt".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        entries.push(Value::Object(entry));

        fs::create_dir_all(&self.dir)?;
        let writer = BufWriter::new(File::create(self.file(store))?);
        serde_json::to_writer_pretty(writer, &entries)
            .map_err(|error| AppError::malformed(store, error))?;
        Ok(entries.len())
    }

    pub fn entries(&self, store: &str) -> Result<Vec<Value>, AppError> {
        check_store_key(store)?;
        let path = self.file(store);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&path)?);
        serde_json::from_reader::<_, Vec<Value>>(reader).map_err(|error| {
            warn!("{} is not a JSON array: {}", path.display(), error);
            AppError::malformed(store, error)
        })
    }

    fn file(&self, store: &str) -> PathBuf {
        self.dir.join(format!("{}.json", store))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub fn check_store_key(store: &str) -> Result<(), AppError> {
    let valid = !store.is_empty()
        && store
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid store key \"{}\".", store)))
    }
}

/// Relays a form and, once accepted, mirrors it into the audit trail.
/// Recording is best effort: a failure is logged, the submission stands.
pub async fn relay_form(
    relay: &FormRelay,
    audit: &AuditLog,
    store: Option<&str>,
    fields: &[(String, String)],
) -> Result<&'static str, AppError> {
    if let Some(store) = store {
        check_store_key(store)?;
    }
    relay.submit(fields).await?;

    if let Some(store) = store {
        match audit.record(store, fields) {
            Ok(count) => info!("Recorded submission #{} in {}", count, store),
            Err(error) => warn!("Could not record submission locally: {}", error),
        }
    }
    Ok(SUCCESS_MESSAGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn record_skips_honeypot_and_stamps_entries() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("audit"));

        let count = audit
            .record(
                "orders",
                &fields(&[("email", "a@b.fr"), ("_gotcha", ""), ("product", "P-1 – Clip")]),
            )
            .unwrap();
        assert_eq!(count, 1);
        audit.record("orders", &fields(&[("email", "c@d.fr")])).unwrap();

        let entries = audit.entries("orders").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["email"], "a@b.fr");
        assert_eq!(entries[0]["product"], "P-1 – Clip");
        assert!(entries[0].get("_gotcha").is_none());
        assert!(entries[0]["createdAt"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn unreadable_trail_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        for (store, content) in [
            ("contact", "{oops"),
            ("legacy", r#"{"legacy":[{"email":"old@x.fr"}]}"#),
        ] {
            let file = dir.path().join(format!("{}.json", store));
            std::fs::write(&file, content).unwrap();

            assert!(matches!(audit.entries(store), Err(AppError::Malformed { .. })));
            assert!(audit.record(store, &fields(&[("email", "new@x.fr")])).is_err());
            assert_eq!(std::fs::read_to_string(&file).unwrap(), content);
        }
    }

    #[test]
    fn concurrent_records_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path());
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let audit = &audit;
                scope.spawn(move || {
                    for i in 0..10 {
                        let email = format!("{}-{}@x.fr", worker, i);
                        audit.record("orders", &fields(&[("email", email.as_str())])).unwrap();
                    }
                });
            }
        });
        assert_eq!(audit.entries("orders").unwrap().len(), 40);
    }

    #[test]
    fn store_keys_cannot_escape_the_directory() {
        assert!(check_store_key("orders_2024-fr").is_ok());
        assert!(check_store_key("../secrets").is_err());
        assert!(check_store_key("").is_err());
    }

    #[actix_web::test]
    async fn bad_store_key_is_rejected_before_relaying() {
        let dir = tempfile::tempdir().unwrap();
        // Nothing listens here; reaching the network would fail differently.
        let relay = FormRelay::new("http://127.0.0.1:9/unused");
        let audit = AuditLog::new(dir.path());
        let error = relay_form(&relay, &audit, Some("a/b"), &fields(&[("x", "y")]))
            .await
            .unwrap_err();
        assert!(matches!(error, AppError::Validation(_)));
    }
}
