//! Messages exchanged between the page context, the coordinator and UI
//! listeners.

use serde::{Deserialize, Serialize};

use crate::store::MemoEntry;

/// A request from the page context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    SaveTimestampRequest {
        #[serde(rename = "rawText", default)]
        raw_text: String,
    },
}

impl Request {
    pub fn save_timestamp(raw_text: impl Into<String>) -> Self {
        Request::SaveTimestampRequest {
            raw_text: raw_text.into(),
        }
    }
}

/// Why a capture was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NoTimeFound,
}

/// Reply to [`Request::SaveTimestampRequest`].
///
/// On the wire this is `{ok: true, value, item}` or `{ok: false, reason}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireResponse", try_from = "WireResponse")]
pub enum CaptureResponse {
    Saved { value: String, item: MemoEntry },
    Rejected { reason: RejectReason },
}

impl CaptureResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, CaptureResponse::Saved { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireResponse {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    item: Option<MemoEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<RejectReason>,
}

impl From<CaptureResponse> for WireResponse {
    fn from(resp: CaptureResponse) -> Self {
        match resp {
            CaptureResponse::Saved { value, item } => WireResponse {
                ok: true,
                value: Some(value),
                item: Some(item),
                reason: None,
            },
            CaptureResponse::Rejected { reason } => WireResponse {
                ok: false,
                value: None,
                item: None,
                reason: Some(reason),
            },
        }
    }
}

impl TryFrom<WireResponse> for CaptureResponse {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        match wire {
            WireResponse {
                ok: true,
                value: Some(value),
                item: Some(item),
                ..
            } => Ok(CaptureResponse::Saved { value, item }),
            WireResponse {
                ok: false,
                reason: Some(reason),
                ..
            } => Ok(CaptureResponse::Rejected { reason }),
            WireResponse { ok: true, .. } => {
                Err("successful capture response is missing value or item".to_string())
            }
            WireResponse { ok: false, .. } => {
                Err("failed capture response is missing reason".to_string())
            }
        }
    }
}

/// Sent to every listener after a successful capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    MemoAdded { item: MemoEntry },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry() -> MemoEntry {
        MemoEntry {
            id: "1700000000000_ab".to_string(),
            time: "00:10:03".to_string(),
            note: String::new(),
        }
    }

    #[test]
    fn request_uses_camel_case_raw_text() {
        let req: Request = serde_json::from_value(json!({
            "type": "save_timestamp_request",
            "rawText": "스트리밍 00:10:05"
        }))
        .unwrap();
        assert_eq!(req, Request::save_timestamp("스트리밍 00:10:05"));
    }

    #[test]
    fn request_without_raw_text_defaults_to_empty() {
        let req: Request =
            serde_json::from_value(json!({"type": "save_timestamp_request"})).unwrap();
        assert_eq!(req, Request::save_timestamp(""));
    }

    #[test]
    fn saved_response_wire_shape() {
        let resp = CaptureResponse::Saved {
            value: "00:10:03".to_string(),
            item: entry(),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({
                "ok": true,
                "value": "00:10:03",
                "item": {"id": "1700000000000_ab", "time": "00:10:03", "note": ""}
            })
        );
    }

    #[test]
    fn rejected_response_wire_shape() {
        let resp = CaptureResponse::Rejected {
            reason: RejectReason::NoTimeFound,
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"ok": false, "reason": "no_time_found"})
        );
    }

    #[test]
    fn inconsistent_response_is_rejected() {
        let result = serde_json::from_value::<CaptureResponse>(json!({"ok": true}));
        assert!(result.is_err());
    }

    #[test]
    fn notification_wire_shape() {
        let note = Notification::MemoAdded { item: entry() };
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "memo_added");
        assert_eq!(value["item"]["time"], "00:10:03");
    }
}
