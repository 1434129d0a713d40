//! Error types for bom2pic-core.

use serde::Serialize;
use thiserror::Error;

/// Structured detail carried by a quota rejection.
///
/// Serializes to the body the request layer returns alongside a
/// "payment required" status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaRejection {
    /// Plan id the request was evaluated against.
    pub plan: String,
    /// Monthly image quota of that plan.
    pub limit: u64,
    /// Usage already recorded for the period.
    pub usage: u64,
    /// Usage period, formatted `YYYY-MM`.
    #[serde(rename = "month")]
    pub period: String,
    /// Always `limit_exceeded`.
    pub reason: &'static str,
}

impl QuotaRejection {
    pub fn new(plan: impl Into<String>, limit: u64, usage: u64, period: impl Into<String>) -> Self {
        QuotaRejection {
            plan: plan.into(),
            limit,
            usage,
            period: period.into(),
            reason: "limit_exceeded",
        }
    }

    /// JSON body for the rejection.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"plan":"{}","limit":{},"usage":{},"month":"{}","reason":"limit_exceeded"}}"#,
                self.plan, self.limit, self.usage, self.period
            )
        })
    }
}

/// HTTP-style status class of an error, for the request layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    /// 400
    BadRequest,
    /// 402
    PaymentRequired,
    /// 422
    Unprocessable,
    /// 500
    Internal,
}

impl StatusClass {
    pub fn http_status(self) -> u16 {
        match self {
            StatusClass::BadRequest => 400,
            StatusClass::PaymentRequired => 402,
            StatusClass::Unprocessable => 422,
            StatusClass::Internal => 500,
        }
    }
}

/// Errors that can occur while extracting images from workbooks.
#[derive(Error, Debug)]
pub enum Bom2PicError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Malformed relationships in {part}: {detail}")]
    MalformedRelationships { part: String, detail: String },

    #[error("Malformed part {part}: {detail}")]
    MalformedPart { part: String, detail: String },

    #[error("Invalid column reference: {0}")]
    InvalidColumnReference(String),

    #[error("Unreadable file '{file}': {reason}")]
    UnreadableFile { file: String, reason: String },

    #[error("Monthly image limit reached for plan '{}' ({}/{} in {})", .0.plan, .0.usage, .0.limit, .0.period)]
    QuotaExceeded(QuotaRejection),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Usage store error: {0}")]
    UsageStore(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Bom2PicError {
    pub(crate) fn malformed_part(part: &str, detail: impl std::fmt::Display) -> Self {
        Bom2PicError::MalformedPart {
            part: part.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn malformed_rels(part: &str, detail: impl std::fmt::Display) -> Self {
        Bom2PicError::MalformedRelationships {
            part: part.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Status class the request layer should answer with.
    pub fn status_class(&self) -> StatusClass {
        match self {
            Bom2PicError::QuotaExceeded(_) => StatusClass::PaymentRequired,
            Bom2PicError::InvalidColumnReference(_) | Bom2PicError::InvalidRequest(_) => {
                StatusClass::BadRequest
            }
            Bom2PicError::MalformedContainer(_)
            | Bom2PicError::MalformedRelationships { .. }
            | Bom2PicError::MalformedPart { .. }
            | Bom2PicError::UnreadableFile { .. } => StatusClass::Unprocessable,
            Bom2PicError::Io(_)
            | Bom2PicError::Zip(_)
            | Bom2PicError::Xml(_)
            | Bom2PicError::Csv(_)
            | Bom2PicError::UsageStore(_)
            | Bom2PicError::Config(_) => StatusClass::Internal,
        }
    }

    /// Human-readable detail string, or the JSON body for quota rejections.
    pub fn detail(&self) -> String {
        match self {
            Bom2PicError::QuotaExceeded(rejection) => rejection.to_json(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for bom2pic operations.
pub type Result<T> = std::result::Result<T, Bom2PicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_rejection_json_shape() {
        let rejection = QuotaRejection::new("free", 200, 200, "2026-10");
        let value: serde_json::Value = serde_json::from_str(&rejection.to_json()).unwrap();
        assert_eq!(value["plan"], "free");
        assert_eq!(value["limit"], 200);
        assert_eq!(value["usage"], 200);
        assert_eq!(value["month"], "2026-10");
        assert_eq!(value["reason"], "limit_exceeded");
    }

    #[test]
    fn test_status_classes() {
        let quota = Bom2PicError::QuotaExceeded(QuotaRejection::new("free", 1, 1, "2026-01"));
        assert_eq!(quota.status_class().http_status(), 402);
        assert_eq!(
            Bom2PicError::InvalidColumnReference("1".into()).status_class(),
            StatusClass::BadRequest
        );
        let unreadable = Bom2PicError::UnreadableFile {
            file: "a.xlsx".into(),
            reason: "not a zip".into(),
        };
        assert_eq!(unreadable.status_class().http_status(), 422);
    }

    #[test]
    fn test_detail_is_json_for_quota() {
        let quota = Bom2PicError::QuotaExceeded(QuotaRejection::new("basic", 5000, 5001, "2026-02"));
        assert!(quota.detail().contains("\"reason\":\"limit_exceeded\""));
        assert!(quota.to_string().contains("basic"));
    }
}
