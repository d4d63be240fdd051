//! Transactional ownership and invoice ledger.
//!
//! Every multi-step mutation (invoice creation, payment reconciliation) runs
//! through a [`LedgerTx`]. Dropping a transaction without calling
//! [`LedgerTx::commit`] rolls it back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::catalog::Video;
use crate::models::invoice::{Invoice, InvoiceStatus, InvoiceTarget, NewInvoice};
use crate::models::payment::NewPayment;
use crate::models::user::{Customer, User};
use crate::repositories::catalog_repo::CatalogRepository;
use crate::repositories::collection_repo::CollectionRepository;
use crate::repositories::invoice_repo::InvoiceRepository;

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>>;

    async fn find_video(&self, episode: i32) -> Result<Option<Video>>;

    async fn owns_video(&self, user_id: i64, episode: i32) -> Result<bool>;
}

#[async_trait]
pub trait LedgerTx: Send {
    /// Creates the user if needed and holds a row lock on it until the transaction ends.
    async fn lock_user(&mut self, customer: &Customer) -> Result<User>;

    async fn owns_video(&mut self, user_id: i64, episode: i32) -> Result<bool>;

    /// True when an unexpired invoice in `created` state exists for the target.
    async fn has_valid_invoice(
        &mut self,
        user_id: i64,
        target: InvoiceTarget,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Invoice>;

    async fn attach_gateway(
        &mut self,
        invoice_id: Uuid,
        reference: &str,
        payment_url: &str,
        expired_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Returns false if a payment with the same id was already recorded.
    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<bool>;

    /// Moves an invoice out of `created`. Returns false if it was already settled.
    async fn settle_invoice(&mut self, invoice_id: Uuid, status: InvoiceStatus) -> Result<bool>;

    /// Returns false if the user already owned the episode.
    async fn grant_video(&mut self, user_id: i64, episode: i32) -> Result<bool>;

    /// Extends from the later of `now` and the current expiry. Returns the new expiry.
    async fn extend_subscription(
        &mut self,
        user_id: i64,
        days: i32,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    invoices: InvoiceRepository,
    catalog: CatalogRepository,
    collections: CollectionRepository,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            invoices: InvoiceRepository::new(pool.clone()),
            catalog: CatalogRepository::new(pool.clone()),
            collections: CollectionRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin ledger transaction")?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>> {
        self.invoices.get_by_id(id).await
    }

    async fn find_video(&self, episode: i32) -> Result<Option<Video>> {
        self.catalog.get_video(episode).await
    }

    async fn owns_video(&self, user_id: i64, episode: i32) -> Result<bool> {
        self.collections.owns(user_id, episode).await
    }
}

pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_user(&mut self, customer: &Customer) -> Result<User> {
        sqlx::query(
            "INSERT INTO users (id, first_name, created_at) VALUES ($1, $2, CURRENT_TIMESTAMP) ON CONFLICT (id) DO NOTHING",
        )
        .bind(customer.id)
        .bind(&customer.first_name)
        .execute(&mut *self.tx)
        .await
        .context("Failed to upsert user")?;

        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(customer.id)
            .fetch_one(&mut *self.tx)
            .await
            .context("Failed to lock user row")
    }

    async fn owns_video(&mut self, user_id: i64, episode: i32) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM video_collections WHERE user_id = $1 AND running_man_video_episode = $2)",
        )
        .bind(user_id)
        .bind(episode)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to check video ownership")
    }

    async fn has_valid_invoice(
        &mut self,
        user_id: i64,
        target: InvoiceTarget,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM invoices
                WHERE user_id = $1
                  AND running_man_video_episode IS NOT DISTINCT FROM $2
                  AND status = 'created'
                  AND expired_at > $3
            )
            "#,
        )
        .bind(user_id)
        .bind(target.episode())
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to check for a valid invoice")
    }

    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Invoice> {
        sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (id, user_id, running_man_video_episode, amount, status, expired_at, created_at)
            VALUES ($1, $2, $3, $4, 'created', $5, CURRENT_TIMESTAMP)
            RETURNING *
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.user_id)
        .bind(invoice.target.episode())
        .bind(invoice.amount)
        .bind(invoice.expired_at)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to insert invoice")
    }

    async fn attach_gateway(
        &mut self,
        invoice_id: Uuid,
        reference: &str,
        payment_url: &str,
        expired_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE invoices SET reference = $2, payment_url = $3, expired_at = $4 WHERE id = $1",
        )
        .bind(invoice_id)
        .bind(reference)
        .bind(payment_url)
        .bind(expired_at)
        .execute(&mut *self.tx)
        .await
        .context("Failed to attach gateway details to invoice")?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO payments (id, user_id, invoice_id, amount_paid, status, created_at)
            VALUES ($1, $2, $3, $4, $5, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&payment.id)
        .bind(payment.user_id)
        .bind(payment.invoice_id)
        .bind(payment.amount_paid)
        .bind(&payment.status)
        .execute(&mut *self.tx)
        .await
        .context("Failed to insert payment")?;
        Ok(res.rows_affected() == 1)
    }

    async fn settle_invoice(&mut self, invoice_id: Uuid, status: InvoiceStatus) -> Result<bool> {
        let res = sqlx::query("UPDATE invoices SET status = $2 WHERE id = $1 AND status = 'created'")
            .bind(invoice_id)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await
            .context("Failed to settle invoice")?;
        Ok(res.rows_affected() == 1)
    }

    async fn grant_video(&mut self, user_id: i64, episode: i32) -> Result<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO video_collections (user_id, running_man_video_episode, created_at)
            VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(episode)
        .execute(&mut *self.tx)
        .await
        .context("Failed to add video to collection")?;
        Ok(res.rows_affected() == 1)
    }

    async fn extend_subscription(
        &mut self,
        user_id: i64,
        days: i32,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            UPDATE users
            SET subscription_expired_at = GREATEST(COALESCE(subscription_expired_at, $3), $3) + make_interval(days => $2)
            WHERE id = $1
            RETURNING subscription_expired_at
            "#,
        )
        .bind(user_id)
        .bind(days)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to extend subscription")?
        .with_context(|| format!("User {} not found", user_id))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit ledger transaction")
    }
}
