use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A 2xx reply from the service, kept as parsed JSON for presentation.
///
/// Bodies that are not JSON are kept as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub status: u16,
    pub body: Value,
}

impl SubmissionReceipt {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// The service's human-readable `message`, if any.
    pub fn message(&self) -> Option<&str> {
        self.body.get("message").and_then(Value::as_str)
    }

    pub fn registration(&self) -> Option<RegistrationReceipt> {
        serde_json::from_value(self.body.clone()).ok()
    }

    pub fn verification(&self) -> Option<VerificationReceipt> {
        serde_json::from_value(self.body.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegistrationReceipt {
    pub message: String,
    pub user_id: i64,
    pub name: String,
    pub age: i64,
}

/// Verification reply. A 2xx with no `user_id` means no registered face
/// matched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VerificationReceipt {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    /// Similarity as the service formats it, e.g. `"87.40%"`.
    #[serde(default)]
    pub confidence: Option<String>,
}

impl VerificationReceipt {
    pub fn is_match(&self) -> bool {
        self.user_id.is_some()
    }

    /// `confidence` as a percentage number.
    pub fn confidence_percent(&self) -> Option<f64> {
        self.confidence
            .as_deref()
            .map(|c| c.trim().trim_end_matches('%'))
            .and_then(|c| c.parse().ok())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub age: i64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Accepts RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp '{raw}'")))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
