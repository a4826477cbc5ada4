//! Finished call record

use crate::domain::call::value_object::{CapturedDetails, TranscriptEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal artifact of one call, handed to the call-record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: u64,
    pub user_id: String,
    pub caller_name: String,
    pub details: CapturedDetails,
    pub transcript: Vec<TranscriptEntry>,
}

impl CallRecord {
    /// Body of the store's `POST`
    pub fn to_payload(&self) -> CallRecordPayload<'_> {
        CallRecordPayload {
            duration_seconds: self.duration_seconds,
            user_id: &self.user_id,
            details: DetailsPayload {
                name: &self.caller_name,
                reason: self.details.reason.as_deref().unwrap_or_default(),
                email: self.details.email.as_deref().unwrap_or_default(),
                phone: self.details.phone.as_deref().unwrap_or_default(),
            },
            transcript: &self.transcript,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecordPayload<'a> {
    pub duration_seconds: u64,
    pub user_id: &'a str,
    pub details: DetailsPayload<'a>,
    pub transcript: &'a [TranscriptEntry],
}

#[derive(Debug, Serialize)]
pub struct DetailsPayload<'a> {
    pub name: &'a str,
    pub reason: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::value_object::Speaker;

    #[test]
    fn test_payload_shape() {
        let record = CallRecord {
            timestamp: Utc::now(),
            duration_seconds: 42,
            user_id: "user-1".to_string(),
            caller_name: "Sam".to_string(),
            details: CapturedDetails {
                phone: Some("555-0100".to_string()),
                email: None,
                reason: Some("Quote request".to_string()),
            },
            transcript: vec![TranscriptEntry::new("t1", Speaker::Agent, "Good morning")],
        };

        let json = serde_json::to_value(record.to_payload()).unwrap();

        assert_eq!(json["durationSeconds"], 42);
        assert_eq!(json["userId"], "user-1");
        assert_eq!(json["details"]["name"], "Sam");
        assert_eq!(json["details"]["phone"], "555-0100");
        assert_eq!(json["details"]["email"], "");
        assert_eq!(json["details"]["reason"], "Quote request");
        assert_eq!(json["transcript"][0]["turnId"], "t1");
        assert_eq!(json["transcript"][0]["speaker"], "agent");
    }
}
