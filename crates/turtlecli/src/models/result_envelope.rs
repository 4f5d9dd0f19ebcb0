use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::utils::time::utc_now_rfc3339;

pub const RESULT_ENVELOPE_SCHEMA_VERSION: &str = "turtlecli.result-envelope.v1";

pub type ResultEnvelopeMeta = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeNotice {
    pub code: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Machine-readable wrapper printed by `--json` for history and report output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub ok: bool,
    pub command: String,
    pub generated_at_utc: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub meta: ResultEnvelopeMeta,
    pub warnings: Vec<EnvelopeNotice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeNotice>,
}

impl ResultEnvelope {
    #[must_use]
    pub fn ok(command: impl Into<String>, data: Value) -> Self {
        let mut envelope = Self::base(command, true);
        envelope.data = Some(data);
        envelope
    }

    #[must_use]
    pub fn error(
        command: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut envelope = Self::base(command, false);
        envelope.error = Some(EnvelopeNotice {
            code: code.into(),
            message: message.into(),
            details: None,
        });
        envelope
    }

    fn base(command: impl Into<String>, ok: bool) -> Self {
        let mut meta = ResultEnvelopeMeta::new();
        meta.insert(
            "schema_version".to_string(),
            json!(RESULT_ENVELOPE_SCHEMA_VERSION),
        );

        Self {
            ok,
            command: command.into(),
            generated_at_utc: utc_now_rfc3339(),
            data: None,
            meta,
            warnings: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_warning(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.warnings.push(EnvelopeNotice {
            code: code.into(),
            message: message.into(),
            details: None,
        });
        self
    }

    #[must_use]
    pub fn with_error_details(mut self, details: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details);
        }
        self
    }

    #[must_use]
    pub fn with_warning_details(mut self, details: Value) -> Self {
        if let Some(last_warning) = self.warnings.last_mut() {
            last_warning.details = Some(details);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{RESULT_ENVELOPE_SCHEMA_VERSION, ResultEnvelope};

    #[test]
    fn ok_envelope_carries_schema_version_and_data() {
        let envelope = ResultEnvelope::ok("history", json!({"rows": []}))
            .with_meta("matched_count", json!(0))
            .with_warning("no_results", "no scripts found")
            .with_warning_details(json!({"suggestion": "--fuzzy"}));

        assert!(envelope.ok);
        assert!(envelope.generated_at_utc.ends_with('Z'));
        assert_eq!(
            envelope.meta.get("schema_version"),
            Some(&json!(RESULT_ENVELOPE_SCHEMA_VERSION))
        );
        assert_eq!(envelope.meta.get("matched_count"), Some(&json!(0)));
        assert_eq!(
            envelope.warnings[0].details.as_ref(),
            Some(&json!({"suggestion": "--fuzzy"}))
        );

        let encoded = serde_json::to_value(&envelope).expect("envelope should serialize");
        let object = encoded.as_object().expect("envelope should be an object");
        assert!(object.contains_key("data"));
        assert!(!object.contains_key("error"));
    }

    #[test]
    fn error_envelope_omits_data() {
        let envelope = ResultEnvelope::error("report", "lookup_failed", "names not found");
        assert!(!envelope.ok);
        assert!(envelope.data.is_none());
        assert_eq!(
            envelope.error.as_ref().map(|error| error.code.as_str()),
            Some("lookup_failed")
        );
    }
}
