//! Order status lifecycle.
//!
//! Transition rules per order type:
//!
//! - **Walk-in**: Pending and Completed only, and only Pending -> Completed.
//! - **Digital**: Pending, Approved, Out for Delivery, Completed and
//!   Cancelled, in any direction. Cancelling needs confirmation.
//!
//! A change is applied to the local cache first and then pushed to the
//! backend. A failed push leaves the local change in place.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backend::{OrderBackend, StatusUpdateRequest};
use crate::error::{PosError, PosResult, RejectReason};
use crate::order::{Order, OrderStatus, OrderType};
use crate::sync::OrderSynchronizer;
use crate::views::branches_match;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Aggregate view; may change any branch's orders.
    Admin,
    Cashier { branch: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// Display id (`ORD-007`) or backend row id.
    pub order_id: String,
    /// Status label as picked in the dashboard.
    pub status: String,
    /// The user confirmed the change (required for cancellation).
    pub confirmed: bool,
    pub note: Option<String>,
}

impl StatusChange {
    pub fn new(order_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: status.into(),
            confirmed: false,
            note: None,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusOutcome {
    /// Requested status equals the current one; nothing was written.
    Unchanged(Order),
    Applied(Order),
    /// Stored locally; the backend push failed.
    LocalOnly { order: Order, error: String },
}

impl StatusOutcome {
    pub fn order(&self) -> &Order {
        match self {
            StatusOutcome::Unchanged(order) | StatusOutcome::Applied(order) => order,
            StatusOutcome::LocalOnly { order, .. } => order,
        }
    }
}

pub fn allowed_statuses(order_type: OrderType) -> &'static [OrderStatus] {
    match order_type {
        OrderType::WalkIn => &[OrderStatus::Pending, OrderStatus::Completed],
        OrderType::Digital => &OrderStatus::ALL,
    }
}

/// Check one transition against the table for the order's type.
pub fn validate_transition(
    order_type: OrderType,
    from: OrderStatus,
    to: OrderStatus,
    confirmed: bool,
) -> Result<(), RejectReason> {
    if !allowed_statuses(order_type).contains(&to) {
        return Err(RejectReason::NotAllowedForType);
    }
    match order_type {
        OrderType::WalkIn => {
            if from == OrderStatus::Pending && to == OrderStatus::Completed {
                Ok(())
            } else {
                Err(RejectReason::NotAllowedForType)
            }
        }
        OrderType::Digital => {
            if to == OrderStatus::Cancelled && !confirmed {
                Err(RejectReason::ConfirmationRequired)
            } else {
                Ok(())
            }
        }
    }
}

fn stamp(order: &mut Order, status: OrderStatus) {
    let now = Some(Utc::now());
    match status {
        OrderStatus::Approved => order.approved_at = now,
        OrderStatus::OutForDelivery => order.out_for_delivery_at = now,
        OrderStatus::Completed => order.completed_at = now,
        OrderStatus::Cancelled => order.cancelled_at = now,
        OrderStatus::Pending => {}
    }
}

pub struct StatusController {
    synchronizer: Arc<OrderSynchronizer>,
    backend: Arc<dyn OrderBackend>,
}

impl StatusController {
    pub fn new(synchronizer: Arc<OrderSynchronizer>, backend: Arc<dyn OrderBackend>) -> Self {
        Self {
            synchronizer,
            backend,
        }
    }

    /// Validate and apply a status change. Rejections carry the status the
    /// order keeps.
    pub async fn set_status(
        &self,
        actor: &Actor,
        change: StatusChange,
    ) -> PosResult<StatusOutcome> {
        let mut order = self
            .synchronizer
            .cached()
            .into_iter()
            .find(|o| o.matches_id(&change.order_id))
            .ok_or_else(|| PosError::OrderNotFound(change.order_id.clone()))?;
        let previous = order.status;

        let reject = |reason: RejectReason| PosError::StatusRejected {
            order_id: order.id.clone(),
            previous,
            reason,
        };

        let Some(target) = OrderStatus::parse(&change.status) else {
            return Err(reject(RejectReason::UnknownStatus));
        };
        if let Actor::Cashier { branch } = actor {
            if !branches_match(&order.branch, branch) {
                return Err(reject(RejectReason::BranchMismatch));
            }
        }
        if target == previous {
            return Ok(StatusOutcome::Unchanged(order));
        }
        validate_transition(order.order_type, previous, target, change.confirmed)
            .map_err(reject)?;

        order.status = target;
        stamp(&mut order, target);
        if change.note.is_some() {
            order.status_note = change.note.clone();
        }
        self.synchronizer.upsert_local(&order)?;

        let request = StatusUpdateRequest {
            id: order
                .order_db_id
                .map(|db_id| json!(db_id))
                .unwrap_or_else(|| json!(order.id)),
            status: target.label().to_string(),
            note: change.note,
        };
        match self.backend.update_status(&request).await {
            Ok(()) => {
                info!(order_id = %order.id, from = %previous, to = %target, "Order status updated");
                Ok(StatusOutcome::Applied(order))
            }
            Err(e) => {
                warn!(
                    order_id = %order.id,
                    to = %target,
                    error = %e,
                    "Status push failed, kept as local-only update"
                );
                Ok(StatusOutcome::LocalOnly {
                    order,
                    error: e.to_string(),
                })
            }
        }
    }
}
