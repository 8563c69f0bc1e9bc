//! # Hub Wire Events
//!
//! The JSON frames exchanged between the hub and connected devices.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Event Envelope                                  │
//! │                                                                         │
//! │  {                                                                      │
//! │    "type":      "kitchen_ack",            ◄── EventKind wire name       │
//! │    "client_id": "7c1e…",                  ◄── originating session       │
//! │    "timestamp": "2026-03-02T18:04:11Z",   ◄── RFC 3339                  │
//! │    "data":      { "order_id": 42, ... }   ◄── kind-specific payload     │
//! │  }                                                                      │
//! │                                                                         │
//! │  Decoded ONCE at the socket boundary into EventMessage { HubEvent }.   │
//! │  Everything past the boundary matches on typed variants.               │
//! │                                                                         │
//! │  DIRECTION                                                             │
//! │  ─────────                                                             │
//! │  client → hub:  order_new, order_update, order_ready, order_cancelled, │
//! │                 table_update, kitchen_order, kitchen_update,           │
//! │                 kitchen_ack, print_receipt, notification, heartbeat,   │
//! │                 authenticate                                           │
//! │  hub → client:  everything above, plus kitchen_ack_result and          │
//! │                 auth_response (server-only)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::Role;

// =============================================================================
// Event Kind
// =============================================================================

/// Every event type the hub understands, by wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OrderNew,
    OrderUpdate,
    OrderReady,
    OrderCancelled,
    TableUpdate,
    KitchenOrder,
    KitchenUpdate,
    KitchenAck,
    KitchenAckResult,
    PrintReceipt,
    Notification,
    Heartbeat,
    Authenticate,
    AuthResponse,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::OrderNew,
        EventKind::OrderUpdate,
        EventKind::OrderReady,
        EventKind::OrderCancelled,
        EventKind::TableUpdate,
        EventKind::KitchenOrder,
        EventKind::KitchenUpdate,
        EventKind::KitchenAck,
        EventKind::KitchenAckResult,
        EventKind::PrintReceipt,
        EventKind::Notification,
        EventKind::Heartbeat,
        EventKind::Authenticate,
        EventKind::AuthResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderNew => "order_new",
            EventKind::OrderUpdate => "order_update",
            EventKind::OrderReady => "order_ready",
            EventKind::OrderCancelled => "order_cancelled",
            EventKind::TableUpdate => "table_update",
            EventKind::KitchenOrder => "kitchen_order",
            EventKind::KitchenUpdate => "kitchen_update",
            EventKind::KitchenAck => "kitchen_ack",
            EventKind::KitchenAckResult => "kitchen_ack_result",
            EventKind::PrintReceipt => "print_receipt",
            EventKind::Notification => "notification",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Authenticate => "authenticate",
            EventKind::AuthResponse => "auth_response",
        }
    }

    /// Kinds only the hub may emit. Clients sending these are ignored.
    pub fn is_server_only(&self) -> bool {
        matches!(self, EventKind::KitchenAckResult | EventKind::AuthResponse)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEventKind(s.to_string()))
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Order lifecycle payload, shared by the order_* and kitchen_order kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderEvent {
    pub order_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<i64>,
    /// Opaque order body (items, notes) relayed untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub details: Option<Value>,
}

impl OrderEvent {
    pub fn new(order_id: i64) -> Self {
        OrderEvent {
            order_id,
            order_number: None,
            status: None,
            table_id: None,
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TableUpdate {
    pub table_id: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
}

/// Kitchen-side status change for one order (e.g. "preparing", "ready").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct KitchenUpdate {
    pub order_id: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
}

/// The kitchen has seen an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct KitchenAck {
    pub order_id: i64,
    pub order_number: String,
}

/// Outcome of a kitchen acknowledgment, fanned out to registers and waiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct KitchenAckResult {
    pub order_id: i64,
    pub order_number: String,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(as = "Option<String>")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl KitchenAckResult {
    pub fn acknowledged(ack: &KitchenAck, at: DateTime<Utc>) -> Self {
        KitchenAckResult {
            order_id: ack.order_id,
            order_number: ack.order_number.clone(),
            acknowledged: true,
            acknowledged_at: Some(at),
            error: None,
        }
    }

    pub fn rejected(ack: &KitchenAck, error: impl Into<String>) -> Self {
        KitchenAckResult {
            order_id: ack.order_id,
            order_number: ack.order_number.clone(),
            acknowledged: false,
            acknowledged_at: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PrintReceipt {
    pub order_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    #[default]
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Notification {
    #[serde(default)]
    pub level: NotificationLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
}

impl Notification {
    pub fn error(message: impl Into<String>, order_id: Option<i64>) -> Self {
        Notification {
            level: NotificationLevel::Error,
            message: message.into(),
            order_id,
        }
    }
}

/// Liveness beat. Every field is optional so `{}` and a missing `data` decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct Heartbeat {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(as = "Option<String>")]
    pub server_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<usize>,
}

/// Client self-identification. Carried for compatibility; no policy is applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(default)]
pub struct Authenticate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Welcome and authenticate reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuthResponse {
    pub success: bool,
    pub client_id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[ts(as = "String")]
    pub server_time: DateTime<Utc>,
}

// =============================================================================
// Hub Event
// =============================================================================

/// A decoded event: the kind and its typed payload in one value.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    OrderNew(OrderEvent),
    OrderUpdate(OrderEvent),
    OrderReady(OrderEvent),
    OrderCancelled(OrderEvent),
    TableUpdate(TableUpdate),
    KitchenOrder(OrderEvent),
    KitchenUpdate(KitchenUpdate),
    KitchenAck(KitchenAck),
    KitchenAckResult(KitchenAckResult),
    PrintReceipt(PrintReceipt),
    Notification(Notification),
    Heartbeat(Heartbeat),
    Authenticate(Authenticate),
    AuthResponse(AuthResponse),
}

impl HubEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HubEvent::OrderNew(_) => EventKind::OrderNew,
            HubEvent::OrderUpdate(_) => EventKind::OrderUpdate,
            HubEvent::OrderReady(_) => EventKind::OrderReady,
            HubEvent::OrderCancelled(_) => EventKind::OrderCancelled,
            HubEvent::TableUpdate(_) => EventKind::TableUpdate,
            HubEvent::KitchenOrder(_) => EventKind::KitchenOrder,
            HubEvent::KitchenUpdate(_) => EventKind::KitchenUpdate,
            HubEvent::KitchenAck(_) => EventKind::KitchenAck,
            HubEvent::KitchenAckResult(_) => EventKind::KitchenAckResult,
            HubEvent::PrintReceipt(_) => EventKind::PrintReceipt,
            HubEvent::Notification(_) => EventKind::Notification,
            HubEvent::Heartbeat(_) => EventKind::Heartbeat,
            HubEvent::Authenticate(_) => EventKind::Authenticate,
            HubEvent::AuthResponse(_) => EventKind::AuthResponse,
        }
    }

    /// Decodes `data` into the payload for `kind`. `null` reads as `{}`.
    pub fn from_parts(kind: EventKind, data: Value) -> CoreResult<Self> {
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data
        };

        Ok(match kind {
            EventKind::OrderNew => HubEvent::OrderNew(payload(kind, data)?),
            EventKind::OrderUpdate => HubEvent::OrderUpdate(payload(kind, data)?),
            EventKind::OrderReady => HubEvent::OrderReady(payload(kind, data)?),
            EventKind::OrderCancelled => HubEvent::OrderCancelled(payload(kind, data)?),
            EventKind::TableUpdate => HubEvent::TableUpdate(payload(kind, data)?),
            EventKind::KitchenOrder => HubEvent::KitchenOrder(payload(kind, data)?),
            EventKind::KitchenUpdate => HubEvent::KitchenUpdate(payload(kind, data)?),
            EventKind::KitchenAck => HubEvent::KitchenAck(payload(kind, data)?),
            EventKind::KitchenAckResult => HubEvent::KitchenAckResult(payload(kind, data)?),
            EventKind::PrintReceipt => HubEvent::PrintReceipt(payload(kind, data)?),
            EventKind::Notification => HubEvent::Notification(payload(kind, data)?),
            EventKind::Heartbeat => HubEvent::Heartbeat(payload(kind, data)?),
            EventKind::Authenticate => HubEvent::Authenticate(payload(kind, data)?),
            EventKind::AuthResponse => HubEvent::AuthResponse(payload(kind, data)?),
        })
    }

    /// Encodes the payload as the envelope's `data` value.
    pub fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            HubEvent::OrderNew(p)
            | HubEvent::OrderUpdate(p)
            | HubEvent::OrderReady(p)
            | HubEvent::OrderCancelled(p)
            | HubEvent::KitchenOrder(p) => serde_json::to_value(p),
            HubEvent::TableUpdate(p) => serde_json::to_value(p),
            HubEvent::KitchenUpdate(p) => serde_json::to_value(p),
            HubEvent::KitchenAck(p) => serde_json::to_value(p),
            HubEvent::KitchenAckResult(p) => serde_json::to_value(p),
            HubEvent::PrintReceipt(p) => serde_json::to_value(p),
            HubEvent::Notification(p) => serde_json::to_value(p),
            HubEvent::Heartbeat(p) => serde_json::to_value(p),
            HubEvent::Authenticate(p) => serde_json::to_value(p),
            HubEvent::AuthResponse(p) => serde_json::to_value(p),
        }
    }
}

fn payload<T: DeserializeOwned>(kind: EventKind, data: Value) -> CoreResult<T> {
    serde_json::from_value(data).map_err(|e| CoreError::invalid_payload(kind.as_str(), e.to_string()))
}

// =============================================================================
// Envelope
// =============================================================================

/// Raw envelope as it appears on the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: Value,
}

/// A decoded hub event with its envelope metadata.
///
/// Serializes to and from the wire envelope, so `serde_json::to_string` and
/// `serde_json::from_str` speak the socket format directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEnvelope", into = "WireEnvelope")]
pub struct EventMessage {
    pub event: HubEvent,
    /// Session id of the device that produced the event, if any.
    pub client_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EventMessage {
    /// Wraps an event stamped with the current time.
    pub fn new(event: HubEvent) -> Self {
        EventMessage {
            event,
            client_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the originating session id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    /// Decodes one text frame.
    ///
    /// ## Errors
    /// - `UnknownEventKind` if `type` names no known kind
    /// - `InvalidPayload` if the frame is not an envelope or `data` does not fit
    pub fn decode(text: &str) -> CoreResult<Self> {
        let envelope: WireEnvelope = serde_json::from_str(text)
            .map_err(|e| CoreError::invalid_payload("envelope", e.to_string()))?;
        EventMessage::try_from(envelope)
    }

    /// Encodes to one text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl TryFrom<WireEnvelope> for EventMessage {
    type Error = CoreError;

    fn try_from(envelope: WireEnvelope) -> Result<Self, Self::Error> {
        let kind: EventKind = envelope.kind.parse()?;
        let event = HubEvent::from_parts(kind, envelope.data)?;
        Ok(EventMessage {
            event,
            client_id: envelope.client_id,
            timestamp: envelope.timestamp.unwrap_or_else(Utc::now),
        })
    }
}

impl From<EventMessage> for WireEnvelope {
    fn from(message: EventMessage) -> Self {
        // Payload structs only hold JSON-representable fields.
        let data = message.event.data().unwrap_or(Value::Null);
        WireEnvelope {
            kind: message.event.kind().as_str().to_string(),
            client_id: message.client_id,
            timestamp: Some(message.timestamp),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_kind_parses_by_wire_name() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert_eq!(EventKind::ALL.len(), 14);
    }

    #[test]
    fn test_decode_kitchen_ack() {
        let text = r#"{"type":"kitchen_ack","timestamp":"2026-03-02T18:04:11Z","data":{"order_id":42,"order_number":"A-17"}}"#;
        let msg = EventMessage::decode(text).unwrap();
        assert_eq!(msg.kind(), EventKind::KitchenAck);
        match msg.event {
            HubEvent::KitchenAck(ack) => {
                assert_eq!(ack.order_id, 42);
                assert_eq!(ack.order_number, "A-17");
            }
            other => panic!("Expected KitchenAck, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_distinct_error() {
        let err = EventMessage::decode(r#"{"type":"dance","data":{}}"#).unwrap_err();
        assert!(err.is_unknown_kind());

        let err = EventMessage::decode(r#"{"type":"kitchen_ack","data":{"order_id":"x"}}"#).unwrap_err();
        assert!(!err.is_unknown_kind());
    }

    #[test]
    fn test_heartbeat_without_data() {
        let msg = EventMessage::decode(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(msg.event, HubEvent::Heartbeat(Heartbeat::default()));
    }

    #[test]
    fn test_encode_shape() {
        let msg = EventMessage::new(HubEvent::KitchenAckResult(KitchenAckResult::rejected(
            &KitchenAck {
                order_id: 7,
                order_number: "B-2".into(),
            },
            "order not found",
        )))
        .with_client_id("abc");

        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "kitchen_ack_result");
        assert_eq!(value["client_id"], "abc");
        assert_eq!(value["data"]["acknowledged"], false);
        assert_eq!(value["data"]["error"], "order not found");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_order_details_are_relayed() {
        let text = json!({
            "type": "order_new",
            "data": { "order_id": 5, "table_id": 3, "details": { "items": [1, 2] } }
        })
        .to_string();
        let msg = EventMessage::decode(&text).unwrap();
        let out: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(out["data"]["details"]["items"], json!([1, 2]));
        assert_eq!(out["data"]["table_id"], 3);
    }
}
