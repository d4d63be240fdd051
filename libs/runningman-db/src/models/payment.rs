use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: String,
    pub user_id: i64,
    pub invoice_id: Uuid,
    pub amount_paid: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    /// Gateway reference or Telegram charge id.
    pub id: String,
    pub user_id: i64,
    pub invoice_id: Uuid,
    pub amount_paid: i64,
    pub status: String,
}
