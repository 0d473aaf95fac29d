//! The single record a run writes to stdout.

use std::io::{self, Write};

use serde::Serialize;
use serde_json::{json, Value};
use spotter_engine::TemplateError;

pub fn emit<T: Serialize>(record: &T) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, record)?;
    writeln!(stdout)?;
    stdout.flush()
}

pub fn template_error_record(err: &TemplateError) -> Value {
    let mut record = json!({ "error": err.code() });
    if let Some(detail) = err.detail() {
        record["detail"] = json!(detail);
    }
    record
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn missing_template_record_has_no_detail() {
        let err = TemplateError::NotFound {
            path: PathBuf::from("crop.png"),
        };
        assert_eq!(
            template_error_record(&err),
            json!({"error": "template_not_found"})
        );
    }

    #[test]
    fn decode_failure_carries_detail() {
        let err = TemplateError::Decode {
            path: PathBuf::from("crop.png"),
            detail: "bad header".to_string(),
        };
        assert_eq!(
            template_error_record(&err),
            json!({"error": "template_decode_failed", "detail": "bad header"})
        );
    }
}
