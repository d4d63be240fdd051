//! Invoice creation and payment reconciliation.
//!
//! Both payment paths end up here: native Telegram invoices are reconciled
//! from `successful_payment` updates, gateway transactions from the webhook.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runningman_db::models::invoice::Invoice;
use runningman_db::models::user::Customer;
use thiserror::Error;
use uuid::Uuid;

mod service;

pub use service::PaymentService;

/// Status string the gateway uses for a settled payment.
pub const PAID_STATUS: &str = "PAID";
pub const SUBSCRIPTION_DAYS: i32 = 30;
pub const INVOICE_TTL_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invoice {0} not found")]
    UnknownInvoice(Uuid),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    /// Database hiccups only; a missing invoice stays missing.
    pub fn is_transient(&self) -> bool {
        match self {
            PaymentError::Internal(e) => runningman_db::db::is_transient(e),
            PaymentError::UnknownInvoice(_) => false,
        }
    }
}

/// Invoice row just inserted, handed to a channel to make it payable.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub invoice: Invoice,
    pub customer: Customer,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instrument {
    /// Payable inside Telegram; nothing to store.
    Native,
    Gateway {
        reference: String,
        payment_url: String,
        expired_at: DateTime<Utc>,
    },
}

/// Turns an invoice into something the user can pay.
/// Runs inside the invoice transaction; an error rolls the invoice back.
#[async_trait]
pub trait PaymentChannel: Send + Sync {
    async fn open(&self, draft: &InvoiceDraft) -> Result<Instrument>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, text: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeniedReason {
    AlreadyOwned,
    InvoiceAlreadyValid,
    UnknownEpisode,
}

#[derive(Debug, Clone)]
pub enum InvoiceOutcome {
    Created(Invoice),
    Denied(DeniedReason),
}

#[derive(Debug, Clone)]
pub struct PaymentNotice {
    /// Gateway reference or Telegram charge id. Deduplicates deliveries.
    pub reference: String,
    pub invoice_id: Uuid,
    pub amount: i64,
    pub status: String,
}

impl PaymentNotice {
    pub fn is_paid(&self) -> bool {
        self.status.eq_ignore_ascii_case(PAID_STATUS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Applied,
    Failed,
    /// Same reference seen before. Nothing changed.
    Duplicate,
    /// New reference for an invoice that was already settled. Recorded only.
    AlreadySettled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutVerdict {
    Accept,
    Reject(String),
}
