use serde::Serialize;

/// Payload posted to the upstream backend when a recording is ready.
/// Field order is part of the signed bytes: the body is serialised exactly
/// once and the same bytes are signed and transmitted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub call_sid: String,
    pub filename: String,
    pub duration_seconds: Option<u32>,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storyteller_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_member_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// Terminal result of one delivery attempt sequence, reported back so the
/// call registry can record `notified`.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub call_sid: String,
    pub delivered: bool,
    pub attempts: u32,
    /// Last HTTP status seen, if any response arrived.
    pub status: Option<u16>,
}
