use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Created,
    Used,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Created => "created",
            InvoiceStatus::Used => "used",
            InvoiceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown invoice status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for InvoiceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(InvoiceStatus::Created),
            "used" => Ok(InvoiceStatus::Used),
            "failed" => Ok(InvoiceStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What an invoice pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvoiceTarget {
    Episode(i32),
    Subscription,
}

impl InvoiceTarget {
    /// Column value: subscriptions are stored with a NULL episode.
    pub fn episode(&self) -> Option<i32> {
        match self {
            InvoiceTarget::Episode(ep) => Some(*ep),
            InvoiceTarget::Subscription => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: i64,
    pub running_man_video_episode: Option<i32>,
    pub amount: i64,
    pub reference: Option<String>,
    pub payment_url: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn target(&self) -> InvoiceTarget {
        match self.running_man_video_episode {
            Some(ep) => InvoiceTarget::Episode(ep),
            None => InvoiceTarget::Subscription,
        }
    }

    pub fn validity(&self, now: DateTime<Utc>) -> InvoiceValidity {
        InvoiceValidity {
            expired: self.expired_at <= now,
            used: self.status != InvoiceStatus::Created,
        }
    }

    /// Unexpired and still waiting for a payment.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.validity(now).is_payable()
    }
}

/// Read-only view returned by invoice validation. A failed invoice counts as used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceValidity {
    pub expired: bool,
    pub used: bool,
}

impl InvoiceValidity {
    pub fn is_payable(&self) -> bool {
        !self.expired && !self.used
    }
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub id: Uuid,
    pub user_id: i64,
    pub target: InvoiceTarget,
    pub amount: i64,
    pub expired_at: DateTime<Utc>,
}
