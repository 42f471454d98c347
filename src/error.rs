//! Error taxonomy for the ordering core.
//!
//! Validation failures are meant to be shown to the user as-is. Remote
//! failures are usually absorbed by the caller (cache fallback) and only
//! surface where the backend is authoritative, i.e. order creation.

use std::fmt;

use thiserror::Error;

use crate::order::OrderStatus;

/// Why a status change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The requested status label is not a known order status.
    UnknownStatus,
    /// The status exists but not for this order type (or not from the
    /// current state, e.g. leaving a completed walk-in order).
    NotAllowedForType,
    /// A branch cashier tried to touch another branch's order.
    BranchMismatch,
    /// Cancelling needs an explicit confirmation step.
    ConfirmationRequired,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::UnknownStatus => "unknown status",
            RejectReason::NotAllowedForType => "status not allowed for this order type",
            RejectReason::BranchMismatch => "order belongs to another branch",
            RejectReason::ConfirmationRequired => "cancellation must be confirmed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum PosError {
    #[error("Product {0} is not on the menu")]
    ProductNotFound(i64),

    #[error("Minimum order for this item is {minimum} (requested {requested})")]
    BelowMinimum { minimum: u32, requested: u32 },

    #[error("Your cart is empty")]
    EmptyCart,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Cart line {0} not found")]
    LineNotFound(String),

    #[error("Please wait a moment before submitting again")]
    Throttled,

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Status change rejected for order {order_id}: {reason}")]
    StatusRejected {
        order_id: String,
        /// Status the order still has; callers restore this in the UI.
        previous: OrderStatus,
        reason: RejectReason,
    },

    #[error("Order could not be placed: {0}")]
    CheckoutRejected(String),

    /// The request never got an answer (connection refused, timeout).
    #[error("{0}")]
    Unreachable(String),

    #[error("{0}")]
    Remote(String),

    #[error("Malformed response from backend: {0}")]
    MalformedPayload(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PosError {
    /// True for errors produced by input validation, which are reported to
    /// the user and never leave partial state behind.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PosError::ProductNotFound(_)
                | PosError::BelowMinimum { .. }
                | PosError::EmptyCart
                | PosError::MissingField(_)
                | PosError::InvalidField { .. }
                | PosError::LineNotFound(_)
                | PosError::Throttled
                | PosError::StatusRejected { .. }
        )
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        PosError::InvalidField {
            field,
            message: message.into(),
        }
    }
}

pub type PosResult<T> = Result<T, PosError>;
