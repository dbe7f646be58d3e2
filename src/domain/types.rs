//! Visitor records and the payloads that create them

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Newtype wrapper for visitor IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct VisitorId(pub u64);

impl std::fmt::Display for VisitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for VisitorId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(VisitorId)
    }
}

/// Newtype wrapper for visitor template IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct TemplateId(pub u64);

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check-in credential carried by a visitor record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    QrToken,
    Otp,
}

impl CredentialField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialField::QrToken => "qrToken",
            CredentialField::Otp => "otp",
        }
    }
}

impl std::fmt::Display for CredentialField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered visitor.
///
/// Created with `arrived == false`; the only mutation is the one-way arrival
/// transition performed by [`Visitor::mark_arrived`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub id: VisitorId,
    pub name: String,
    pub phone: String,
    pub qr_token: String,
    pub otp: String,
    pub arrived: bool,
    pub created_at: DateTime<Utc>,
    pub arrived_at: Option<DateTime<Utc>>,
}

impl Visitor {
    /// Build the stored record for a draft, as the store does on insert
    pub fn from_draft(id: VisitorId, draft: VisitorDraft, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            phone: draft.phone,
            qr_token: draft.qr_token,
            otp: draft.otp,
            arrived: false,
            created_at,
            arrived_at: None,
        }
    }

    /// Mark the visitor as arrived.
    ///
    /// Returns `true` only for the first call; later calls leave the record
    /// (including `arrived_at`) untouched.
    pub fn mark_arrived(&mut self, at: DateTime<Utc>) -> bool {
        if self.arrived {
            return false;
        }
        self.arrived = true;
        self.arrived_at = Some(at);
        true
    }

    /// Case-insensitive substring match against the visitor's name.
    /// `needle` must already be lowercased.
    pub fn name_matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
    }
}

/// Resident-supplied visitor payload.
///
/// Server-owned fields (`id`, `arrived`, timestamps) are ignored if present.
/// Missing or empty credentials are issued by the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVisitor {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone: String,
    #[serde(
        default,
        deserialize_with = "lenient_optional_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub qr_token: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_optional_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub otp: Option<String>,
}

/// Accept `null` as an empty string and scalars (`1234`, `true`) in their
/// textual form. Arrays and objects are rejected.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(lenient_optional_string(deserializer)?.unwrap_or_default())
}

fn lenient_optional_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(de::Error::custom(format!("expected a string, found {other}"))),
    }
}

impl NewVisitor {
    pub fn new(name: &str, phone: &str) -> Self {
        Self { name: name.to_string(), phone: phone.to_string(), qr_token: None, otp: None }
    }

    pub fn with_qr_token(mut self, token: &str) -> Self {
        self.qr_token = Some(token.to_string());
        self
    }

    pub fn with_otp(mut self, otp: &str) -> Self {
        self.otp = Some(otp.to_string());
        self
    }
}

/// Fully resolved visitor fields handed to the store for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct VisitorDraft {
    pub name: String,
    pub phone: String,
    pub qr_token: String,
    pub otp: String,
}

/// Saved visitor details for recurring visitors (schema placeholder)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorTemplate {
    pub id: TemplateId,
    pub name: String,
    pub phone: String,
    pub photo_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVisitorTemplate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub photo_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Visitor {
        let draft = VisitorDraft {
            name: "Alice Smith".to_string(),
            phone: "555-0100".to_string(),
            qr_token: "QR1".to_string(),
            otp: "1234".to_string(),
        };
        Visitor::from_draft(VisitorId(1), draft, Utc::now())
    }

    #[test]
    fn test_mark_arrived_is_one_way() {
        let mut visitor = sample();
        assert!(!visitor.arrived);

        let first = Utc::now();
        assert!(visitor.mark_arrived(first));
        assert!(visitor.arrived);
        assert_eq!(visitor.arrived_at, Some(first));

        // Second confirmation keeps the original arrival time
        assert!(!visitor.mark_arrived(first + chrono::Duration::seconds(30)));
        assert_eq!(visitor.arrived_at, Some(first));
    }

    #[test]
    fn test_name_matches_case_insensitive() {
        let visitor = sample();
        assert!(visitor.name_matches("ali"));
        assert!(visitor.name_matches("smith"));
        assert!(!visitor.name_matches("zzz"));
    }

    #[test]
    fn test_visitor_json_uses_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["id"], 1);
        assert_eq!(json["qrToken"], "QR1");
        assert_eq!(json["otp"], "1234");
        assert_eq!(json["arrived"], false);
        assert!(json["arrivedAt"].is_null());
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn test_new_visitor_ignores_server_fields() {
        let payload = r#"{"id":99,"name":"Bob","phone":"1","arrived":true,"qrToken":"T"}"#;
        let parsed: NewVisitor = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.name, "Bob");
        assert_eq!(parsed.qr_token.as_deref(), Some("T"));
        assert_eq!(parsed.otp, None);
    }

    #[test]
    fn test_new_visitor_accepts_nulls_and_numbers() {
        let payload = r#"{"name":"Alice","phone":null,"qrToken":null,"otp":1234}"#;
        let parsed: NewVisitor = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.name, "Alice");
        assert_eq!(parsed.phone, "");
        assert_eq!(parsed.qr_token, None);
        assert_eq!(parsed.otp.as_deref(), Some("1234"));

        let parsed: NewVisitor = serde_json::from_str(r#"{"name":null,"phone":5550100}"#).unwrap();
        assert_eq!(parsed.name, "");
        assert_eq!(parsed.phone, "5550100");

        assert!(serde_json::from_str::<NewVisitor>(r#"{"name":["Alice"]}"#).is_err());
    }

    #[test]
    fn test_visitor_id_from_str() {
        assert_eq!("42".parse::<VisitorId>().unwrap(), VisitorId(42));
        assert!("abc".parse::<VisitorId>().is_err());
        assert!("-1".parse::<VisitorId>().is_err());
    }
}
