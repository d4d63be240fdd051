//! In-process [`Ledger`] for tests.
//!
//! Transactions take the whole store lock and work on a staged copy, so they
//! serialize like row locks would and vanish on drop unless committed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::ledger::{Ledger, LedgerTx};
use crate::models::catalog::Video;
use crate::models::invoice::{Invoice, InvoiceStatus, InvoiceTarget, NewInvoice};
use crate::models::payment::{NewPayment, Payment};
use crate::models::user::{Customer, User};

#[derive(Debug, Clone, Default)]
struct Store {
    users: HashMap<i64, User>,
    videos: HashMap<i32, Video>,
    invoices: HashMap<Uuid, Invoice>,
    payments: HashMap<String, Payment>,
    collections: HashSet<(i64, i32)>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    store: Arc<Mutex<Store>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_video(&self, library_id: i64, episode: i32, price: i64) -> Video {
        let mut store = self.store.lock().await;
        let video = Video {
            id: Uuid::new_v4(),
            episode,
            running_man_library_id: library_id,
            price,
        };
        store.videos.insert(episode, video.clone());
        video
    }

    pub async fn seed_user(&self, id: i64, subscription_expired_at: Option<DateTime<Utc>>) {
        let mut store = self.store.lock().await;
        store.users.insert(
            id,
            User {
                id,
                first_name: format!("user{}", id),
                subscription_expired_at,
                created_at: Utc::now(),
            },
        );
    }

    /// Rewrites an invoice's expiry, e.g. to simulate a stale invoice.
    pub async fn set_invoice_expiry(&self, id: Uuid, expired_at: DateTime<Utc>) {
        if let Some(inv) = self.store.lock().await.invoices.get_mut(&id) {
            inv.expired_at = expired_at;
        }
    }

    pub async fn user(&self, id: i64) -> Option<User> {
        self.store.lock().await.users.get(&id).cloned()
    }

    pub async fn invoice(&self, id: Uuid) -> Option<Invoice> {
        self.store.lock().await.invoices.get(&id).cloned()
    }

    pub async fn invoices_for(&self, user_id: i64) -> Vec<Invoice> {
        self.store
            .lock()
            .await
            .invoices
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.store.lock().await.payments.values().cloned().collect()
    }

    pub async fn owns(&self, user_id: i64, episode: i32) -> bool {
        self.store.lock().await.collections.contains(&(user_id, episode))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let guard = self.store.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>> {
        Ok(self.invoice(id).await)
    }

    async fn find_video(&self, episode: i32) -> Result<Option<Video>> {
        Ok(self.store.lock().await.videos.get(&episode).cloned())
    }

    async fn owns_video(&self, user_id: i64, episode: i32) -> Result<bool> {
        Ok(self.owns(user_id, episode).await)
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Store>,
    staged: Store,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_user(&mut self, customer: &Customer) -> Result<User> {
        let user = self.staged.users.entry(customer.id).or_insert_with(|| User {
            id: customer.id,
            first_name: customer.first_name.clone(),
            subscription_expired_at: None,
            created_at: Utc::now(),
        });
        Ok(user.clone())
    }

    async fn owns_video(&mut self, user_id: i64, episode: i32) -> Result<bool> {
        Ok(self.staged.collections.contains(&(user_id, episode)))
    }

    async fn has_valid_invoice(
        &mut self,
        user_id: i64,
        target: InvoiceTarget,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .staged
            .invoices
            .values()
            .any(|i| i.user_id == user_id && i.target() == target && i.is_valid(now)))
    }

    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<Invoice> {
        if self.staged.invoices.contains_key(&invoice.id) {
            return Err(anyhow!("duplicate invoice id {}", invoice.id));
        }
        let row = Invoice {
            id: invoice.id,
            user_id: invoice.user_id,
            running_man_video_episode: invoice.target.episode(),
            amount: invoice.amount,
            reference: None,
            payment_url: None,
            status: InvoiceStatus::Created,
            expired_at: invoice.expired_at,
            created_at: Utc::now(),
        };
        self.staged.invoices.insert(row.id, row.clone());
        Ok(row)
    }

    async fn attach_gateway(
        &mut self,
        invoice_id: Uuid,
        reference: &str,
        payment_url: &str,
        expired_at: DateTime<Utc>,
    ) -> Result<()> {
        let inv = self
            .staged
            .invoices
            .get_mut(&invoice_id)
            .ok_or_else(|| anyhow!("invoice {} not found", invoice_id))?;
        inv.reference = Some(reference.to_string());
        inv.payment_url = Some(payment_url.to_string());
        inv.expired_at = expired_at;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> Result<bool> {
        if self.staged.payments.contains_key(&payment.id) {
            return Ok(false);
        }
        self.staged.payments.insert(
            payment.id.clone(),
            Payment {
                id: payment.id.clone(),
                user_id: payment.user_id,
                invoice_id: payment.invoice_id,
                amount_paid: payment.amount_paid,
                status: payment.status.clone(),
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn settle_invoice(&mut self, invoice_id: Uuid, status: InvoiceStatus) -> Result<bool> {
        match self.staged.invoices.get_mut(&invoice_id) {
            Some(inv) if inv.status == InvoiceStatus::Created => {
                inv.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn grant_video(&mut self, user_id: i64, episode: i32) -> Result<bool> {
        Ok(self.staged.collections.insert((user_id, episode)))
    }

    async fn extend_subscription(
        &mut self,
        user_id: i64,
        days: i32,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let user = self
            .staged
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("User {} not found", user_id))?;
        let base = user.subscription_expired_at.map_or(now, |exp| exp.max(now));
        let next = base + Duration::days(i64::from(days));
        user.subscription_expired_at = Some(next);
        Ok(next)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
