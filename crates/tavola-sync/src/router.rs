//! # Event Routing
//!
//! Applies the hub's routing table to events received from a connection.
//!
//! ## Routing Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  inbound kind        from       action                 fan-out          │
//! │  ──────────────────  ─────────  ─────────────────────  ───────────────  │
//! │  order_new           any        relay                  kitchen+register │
//! │                                                        (not originator) │
//! │  order_update        any        relay                  ALL              │
//! │  table_update        any        relay                  ALL              │
//! │  notification        any        relay                  ALL              │
//! │  order_cancelled     any        relay                  kitchen+register │
//! │  order_ready         any        relay                  register+waiter  │
//! │  kitchen_order       any        relay                  kitchen          │
//! │  kitchen_update      kitchen    status callback        register+waiter  │
//! │  kitchen_ack         kitchen    ack callback           register+waiter  │
//! │                                 → kitchen_ack_result                    │
//! │  print_receipt       any        print callback         none             │
//! │  heartbeat           any        reply to originator    none             │
//! │  authenticate        any        auth_response reply    none             │
//! │  kitchen_ack_result  -          dropped (server-only)                   │
//! │  auth_response       -          dropped (server-only)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tavola_core::{
    AuthResponse, EventMessage, Heartbeat, HubEvent, KitchenAck, KitchenAckResult,
    KitchenUpdate, Notification, PrintReceipt, Role, Scope,
};

use crate::error::SyncResult;
use crate::hub::{HubHandle, SessionInfo};

const KITCHEN: Scope = Scope::Role(Role::Kitchen);
const REGISTER: Scope = Scope::Role(Role::Register);
const WAITER: Scope = Scope::Role(Role::Waiter);

// =============================================================================
// Business-Layer Callbacks
// =============================================================================

/// Order state owned by the business layer.
#[async_trait]
pub trait OrderStatusSink: Send + Sync {
    /// Records a kitchen status change. An error stops the fan-out.
    async fn update_status(&self, update: &KitchenUpdate) -> SyncResult<()>;

    /// Records the one-shot "acknowledged by kitchen" transition and
    /// returns when it happened.
    async fn acknowledge(&self, ack: &KitchenAck) -> SyncResult<DateTime<Utc>>;
}

/// Receipt output owned by the business layer.
#[async_trait]
pub trait ReceiptPrinter: Send + Sync {
    async fn print(&self, request: &PrintReceipt) -> SyncResult<()>;
}

/// Accepts every update and acknowledges at the current time.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStatusSink;

#[async_trait]
impl OrderStatusSink for NoOpStatusSink {
    async fn update_status(&self, update: &KitchenUpdate) -> SyncResult<()> {
        debug!(order_id = update.order_id, status = %update.status, "Status update (no sink)");
        Ok(())
    }

    async fn acknowledge(&self, ack: &KitchenAck) -> SyncResult<DateTime<Utc>> {
        debug!(order_id = ack.order_id, "Kitchen ack (no sink)");
        Ok(Utc::now())
    }
}

/// Logs print requests without printing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpPrinter;

#[async_trait]
impl ReceiptPrinter for NoOpPrinter {
    async fn print(&self, request: &PrintReceipt) -> SyncResult<()> {
        info!(order_id = request.order_id, "Receipt print requested (no printer)");
        Ok(())
    }
}

pub(crate) struct HubCallbacks {
    pub(crate) status: Arc<dyn OrderStatusSink>,
    pub(crate) printer: Arc<dyn ReceiptPrinter>,
}

impl Default for HubCallbacks {
    fn default() -> Self {
        HubCallbacks {
            status: Arc::new(NoOpStatusSink),
            printer: Arc::new(NoOpPrinter),
        }
    }
}

// =============================================================================
// Routing
// =============================================================================

impl HubHandle {
    /// Routes one decoded event received from `origin`.
    ///
    /// The event is stamped with the originator's session id before it is
    /// relayed. Events a role may not send are logged and dropped.
    pub async fn handle_inbound(&self, origin: &SessionInfo, message: EventMessage) -> SyncResult<()> {
        let message = message.with_client_id(origin.id.to_string());

        match &message.event {
            HubEvent::OrderNew(_) => {
                self.publish(message, &[KITCHEN, REGISTER], Some(origin.id)).await
            }
            HubEvent::OrderUpdate(_) | HubEvent::TableUpdate(_) | HubEvent::Notification(_) => {
                self.publish(message, &[Scope::All], None).await
            }
            HubEvent::OrderCancelled(_) => self.publish(message, &[KITCHEN, REGISTER], None).await,
            HubEvent::OrderReady(_) => self.publish(message, &[REGISTER, WAITER], None).await,
            HubEvent::KitchenOrder(_) => self.publish(message, &[KITCHEN], None).await,

            HubEvent::KitchenUpdate(update) => {
                if origin.role != Role::Kitchen {
                    warn!(session = %origin.id, role = %origin.role, "kitchen_update from non-kitchen role dropped");
                    return Ok(());
                }
                match self.callbacks.status.update_status(update).await {
                    Ok(()) => self.publish(message.clone(), &[REGISTER, WAITER], None).await,
                    Err(e) => {
                        warn!(order_id = update.order_id, error = %e, "Kitchen status update rejected");
                        let notice = Notification::error(
                            format!("Status update for order {} failed: {}", update.order_id, e),
                            Some(update.order_id),
                        );
                        self.send_to(origin.id, EventMessage::new(HubEvent::Notification(notice)))
                            .await
                    }
                }
            }

            HubEvent::KitchenAck(ack) => {
                if origin.role != Role::Kitchen {
                    warn!(session = %origin.id, role = %origin.role, "kitchen_ack from non-kitchen role dropped");
                    return Ok(());
                }
                let result = match self.callbacks.status.acknowledge(ack).await {
                    Ok(at) => {
                        info!(order_id = ack.order_id, order_number = %ack.order_number, "Order acknowledged by kitchen");
                        KitchenAckResult::acknowledged(ack, at)
                    }
                    Err(e) => {
                        warn!(order_id = ack.order_id, error = %e, "Kitchen acknowledgment failed");
                        KitchenAckResult::rejected(ack, e.to_string())
                    }
                };
                let reply = EventMessage::new(HubEvent::KitchenAckResult(result))
                    .with_client_id(origin.id.to_string());
                self.publish(reply, &[REGISTER, WAITER], None).await
            }

            HubEvent::PrintReceipt(request) => {
                if let Err(e) = self.callbacks.printer.print(request).await {
                    warn!(order_id = request.order_id, error = %e, "Receipt print failed");
                    let notice = Notification::error(
                        format!("Printing order {} failed: {}", request.order_id, e),
                        Some(request.order_id),
                    );
                    self.send_to(origin.id, EventMessage::new(HubEvent::Notification(notice)))
                        .await?;
                }
                Ok(())
            }

            HubEvent::Heartbeat(_) => {
                let beat = Heartbeat {
                    server_time: Some(Utc::now()),
                    connections: None,
                };
                self.send_to(origin.id, EventMessage::new(HubEvent::Heartbeat(beat)))
                    .await
            }

            HubEvent::Authenticate(auth) => {
                debug!(session = %origin.id, device_id = ?auth.device_id, "Authenticate received");
                let reply = AuthResponse {
                    success: true,
                    client_id: origin.id.to_string(),
                    role: origin.role,
                    message: None,
                    server_time: Utc::now(),
                };
                self.send_to(origin.id, EventMessage::new(HubEvent::AuthResponse(reply)))
                    .await
            }

            HubEvent::KitchenAckResult(_) | HubEvent::AuthResponse(_) => {
                warn!(session = %origin.id, kind = %message.kind(), "Server-only event from client dropped");
                Ok(())
            }
        }
    }
}
