use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use runningman_db::db::is_transient;
use runningman_db::ledger::{Ledger, LedgerTx};
use runningman_db::models::catalog::Video;
use runningman_db::models::invoice::{
    Invoice, InvoiceStatus, InvoiceTarget, InvoiceValidity, NewInvoice,
};
use runningman_db::models::payment::NewPayment;
use runningman_db::models::user::Customer;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    CheckoutVerdict, DeniedReason, Instrument, InvoiceDraft, InvoiceOutcome, Notifier,
    PaymentChannel, PaymentError, PaymentNotice, Reconciliation, INVOICE_TTL_MINUTES,
    SUBSCRIPTION_DAYS,
};
use crate::cache::{collection_key, CatalogCache};
use crate::pricing::with_tax;
use crate::retry::with_retry;

#[derive(Clone)]
pub struct PaymentService {
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    cache: CatalogCache,
    subscription_price: i64,
}

impl PaymentService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        cache: CatalogCache,
        subscription_price: i64,
    ) -> Self {
        Self {
            ledger,
            notifier,
            cache,
            subscription_price,
        }
    }

    pub async fn create_purchase_invoice(
        &self,
        customer: &Customer,
        year: i32,
        episode: i32,
        channel: &dyn PaymentChannel,
    ) -> Result<InvoiceOutcome, PaymentError> {
        let Some(video) = self.find_video(episode).await? else {
            return Ok(InvoiceOutcome::Denied(DeniedReason::UnknownEpisode));
        };

        let title = format!("Running Man Episode {}", episode);
        let description = format!(
            "Purchase of Running Man episode {} ({}), tax included. Please pay within 1 hour, the invoice becomes invalid after that.",
            episode, year
        );
        self.create_invoice(
            customer,
            InvoiceTarget::Episode(episode),
            with_tax(video.price),
            title,
            description,
            channel,
        )
        .await
    }

    pub async fn create_subscription_invoice(
        &self,
        customer: &Customer,
        channel: &dyn PaymentChannel,
    ) -> Result<InvoiceOutcome, PaymentError> {
        let title = "Running Man Subscription".to_string();
        let description = format!(
            "{} days of access to every Running Man episode.",
            SUBSCRIPTION_DAYS
        );
        self.create_invoice(
            customer,
            InvoiceTarget::Subscription,
            self.subscription_price,
            title,
            description,
            channel,
        )
        .await
    }

    async fn create_invoice(
        &self,
        customer: &Customer,
        target: InvoiceTarget,
        amount: i64,
        title: String,
        description: String,
        channel: &dyn PaymentChannel,
    ) -> Result<InvoiceOutcome, PaymentError> {
        let now = Utc::now();
        let mut tx = self.begin().await?;
        let user = tx.lock_user(customer).await?;

        if let InvoiceTarget::Episode(episode) = target {
            if tx.owns_video(user.id, episode).await? {
                return Ok(InvoiceOutcome::Denied(DeniedReason::AlreadyOwned));
            }
        }
        if tx.has_valid_invoice(user.id, target, now).await? {
            return Ok(InvoiceOutcome::Denied(DeniedReason::InvoiceAlreadyValid));
        }

        let mut invoice = tx
            .insert_invoice(&NewInvoice {
                id: Uuid::new_v4(),
                user_id: user.id,
                target,
                amount,
                expired_at: now + Duration::minutes(INVOICE_TTL_MINUTES),
            })
            .await?;

        let draft = InvoiceDraft {
            invoice: invoice.clone(),
            customer: customer.clone(),
            title,
            description,
        };
        let instrument = channel
            .open(&draft)
            .await
            .with_context(|| format!("Failed to open payment channel for invoice {}", invoice.id))?;

        if let Instrument::Gateway {
            reference,
            payment_url,
            expired_at,
        } = instrument
        {
            tx.attach_gateway(invoice.id, &reference, &payment_url, expired_at)
                .await?;
            invoice.reference = Some(reference);
            invoice.payment_url = Some(payment_url);
            invoice.expired_at = expired_at;
        }

        tx.commit().await?;
        info!(
            user_id = user.id,
            invoice_id = %invoice.id,
            amount,
            "Invoice created"
        );
        Ok(InvoiceOutcome::Created(invoice))
    }

    pub async fn validate_invoice(&self, invoice_id: Uuid) -> Result<InvoiceValidity, PaymentError> {
        let invoice = self
            .find_invoice(invoice_id)
            .await?
            .ok_or(PaymentError::UnknownInvoice(invoice_id))?;
        Ok(invoice.validity(Utc::now()))
    }

    /// Gateway payment URL, only while the invoice can still be paid.
    pub async fn payable_url(&self, invoice_id: Uuid) -> Result<Option<String>, PaymentError> {
        let invoice = self
            .find_invoice(invoice_id)
            .await?
            .ok_or(PaymentError::UnknownInvoice(invoice_id))?;
        if !invoice.is_valid(Utc::now()) {
            return Ok(None);
        }
        Ok(invoice.payment_url)
    }

    /// Last look before Telegram charges the user for a native invoice.
    pub async fn check_checkout(
        &self,
        invoice_id: Uuid,
        user_id: i64,
    ) -> Result<CheckoutVerdict, PaymentError> {
        let Some(invoice) = self.find_invoice(invoice_id).await? else {
            return Ok(CheckoutVerdict::Reject("This invoice does not exist.".to_string()));
        };
        if invoice.user_id != user_id {
            return Ok(CheckoutVerdict::Reject(
                "This invoice belongs to another user.".to_string(),
            ));
        }
        if !invoice.is_valid(Utc::now()) {
            return Ok(CheckoutVerdict::Reject(
                "This invoice is no longer valid. Please create a new one.".to_string(),
            ));
        }
        if let InvoiceTarget::Episode(episode) = invoice.target() {
            if self.owns_video(user_id, episode).await? {
                return Ok(CheckoutVerdict::Reject(format!(
                    "You already own Running Man episode {}.",
                    episode
                )));
            }
        }
        Ok(CheckoutVerdict::Accept)
    }

    /// Applies a payment notification at most once per reference.
    /// The user is notified before commit; a failed notification rolls everything back.
    /// Transient database failures rerun the whole transaction.
    pub async fn reconcile(&self, notice: &PaymentNotice) -> Result<Reconciliation, PaymentError> {
        with_retry(move || self.reconcile_once(notice), PaymentError::is_transient).await
    }

    async fn reconcile_once(&self, notice: &PaymentNotice) -> Result<Reconciliation, PaymentError> {
        let invoice = self
            .ledger
            .find_invoice(notice.invoice_id)
            .await?
            .ok_or(PaymentError::UnknownInvoice(notice.invoice_id))?;
        let user_id = invoice.user_id;

        let mut tx = self.ledger.begin().await?;
        let recorded = tx
            .insert_payment(&NewPayment {
                id: notice.reference.clone(),
                user_id,
                invoice_id: invoice.id,
                amount_paid: notice.amount,
                status: notice.status.clone(),
            })
            .await?;
        if !recorded {
            info!(reference = %notice.reference, "Duplicate payment notification ignored");
            return Ok(Reconciliation::Duplicate);
        }

        let next = if notice.is_paid() {
            InvoiceStatus::Used
        } else {
            InvoiceStatus::Failed
        };
        if !tx.settle_invoice(invoice.id, next).await? {
            warn!(
                invoice_id = %invoice.id,
                reference = %notice.reference,
                "Payment for an already settled invoice, recorded only"
            );
            tx.commit().await?;
            return Ok(Reconciliation::AlreadySettled);
        }

        if !notice.is_paid() {
            let text = format!(
                "Your payment for invoice {} did not go through (status: {}). Please contact support via /support.",
                invoice.id, notice.status
            );
            self.notifier.notify(user_id, &text).await?;
            tx.commit().await?;
            info!(user_id, invoice_id = %invoice.id, status = %notice.status, "Payment failed");
            return Ok(Reconciliation::Failed);
        }

        if notice.amount != invoice.amount {
            warn!(
                invoice_id = %invoice.id,
                expected = invoice.amount,
                paid = notice.amount,
                "Paid amount differs from invoice"
            );
        }

        let text = match invoice.target() {
            InvoiceTarget::Episode(episode) => {
                tx.grant_video(user_id, episode).await?;
                format!(
                    "Payment received. Running Man episode {} is now in your /collection.",
                    episode
                )
            }
            InvoiceTarget::Subscription => {
                let until = tx
                    .extend_subscription(user_id, SUBSCRIPTION_DAYS, Utc::now())
                    .await?;
                format!(
                    "Payment received. Your subscription is active until {}.",
                    until.format("%Y-%m-%d %H:%M UTC")
                )
            }
        };

        self.notifier.notify(user_id, &text).await?;
        tx.commit().await?;
        if let InvoiceTarget::Episode(_) = invoice.target() {
            self.cache.invalidate(&collection_key(user_id)).await;
        }

        info!(user_id, invoice_id = %invoice.id, reference = %notice.reference, "Payment applied");
        Ok(Reconciliation::Applied)
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn LedgerTx>> {
        let ledger = &self.ledger;
        with_retry(move || ledger.begin(), is_transient).await
    }

    async fn find_invoice(&self, id: Uuid) -> anyhow::Result<Option<Invoice>> {
        let ledger = &self.ledger;
        with_retry(move || ledger.find_invoice(id), is_transient).await
    }

    async fn find_video(&self, episode: i32) -> anyhow::Result<Option<Video>> {
        let ledger = &self.ledger;
        with_retry(move || ledger.find_video(episode), is_transient).await
    }

    async fn owns_video(&self, user_id: i64, episode: i32) -> anyhow::Result<bool> {
        let ledger = &self.ledger;
        with_retry(move || ledger.owns_video(user_id, episode), is_transient).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::encode_i32s;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use runningman_db::memory::MemoryLedger;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
        fail: AtomicBool,
    }

    impl RecordingNotifier {
        fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, user_id: i64, text: &str) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("telegram is down"));
            }
            self.sent.lock().unwrap().push((user_id, text.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeChannel {
        opened: AtomicUsize,
        fail: bool,
        gateway: bool,
    }

    #[async_trait]
    impl PaymentChannel for FakeChannel {
        async fn open(&self, draft: &InvoiceDraft) -> anyhow::Result<Instrument> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("send_invoice failed"));
            }
            if self.gateway {
                return Ok(Instrument::Gateway {
                    reference: format!("T-{}", draft.invoice.id),
                    payment_url: "https://tripay.example/checkout/1".to_string(),
                    expired_at: draft.invoice.expired_at,
                });
            }
            Ok(Instrument::Native)
        }
    }

    /// Delegates to a [`MemoryLedger`], failing the next `begin` calls on demand.
    #[derive(Default)]
    struct FlakyLedger {
        inner: MemoryLedger,
        pool_timeouts: AtomicUsize,
        broken: AtomicBool,
        begins: AtomicUsize,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Ledger for FlakyLedger {
        async fn begin(&self) -> anyhow::Result<Box<dyn LedgerTx>> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            if self.broken.load(Ordering::SeqCst) {
                return Err(anyhow!("relation \"payments\" does not exist"));
            }
            let pending = self.pool_timeouts.load(Ordering::SeqCst);
            if pending > 0 {
                self.pool_timeouts.store(pending - 1, Ordering::SeqCst);
                return Err(runningman_db::sqlx::Error::PoolTimedOut.into());
            }
            self.inner.begin().await
        }

        async fn find_invoice(&self, id: Uuid) -> anyhow::Result<Option<Invoice>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.find_invoice(id).await
        }

        async fn find_video(&self, episode: i32) -> anyhow::Result<Option<Video>> {
            self.inner.find_video(episode).await
        }

        async fn owns_video(&self, user_id: i64, episode: i32) -> anyhow::Result<bool> {
            self.inner.owns_video(user_id, episode).await
        }
    }

    struct Fixture {
        ledger: MemoryLedger,
        notifier: Arc<RecordingNotifier>,
        cache: CatalogCache,
        service: PaymentService,
    }

    async fn fixture() -> Fixture {
        let ledger = MemoryLedger::new();
        ledger.seed_video(118, 230, 1000).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = CatalogCache::new();
        let service = PaymentService::new(
            Arc::new(ledger.clone()),
            notifier.clone(),
            cache.clone(),
            30_000,
        );
        Fixture {
            ledger,
            notifier,
            cache,
            service,
        }
    }

    fn kim() -> Customer {
        Customer::new(7, "Kim")
    }

    async fn buy(fx: &Fixture) -> InvoiceOutcome {
        fx.service
            .create_purchase_invoice(&kim(), 2015, 230, &FakeChannel::default())
            .await
            .unwrap()
    }

    fn created(outcome: InvoiceOutcome) -> runningman_db::models::invoice::Invoice {
        match outcome {
            InvoiceOutcome::Created(inv) => inv,
            InvoiceOutcome::Denied(reason) => panic!("denied: {:?}", reason),
        }
    }

    fn paid(reference: &str, invoice_id: Uuid, amount: i64) -> PaymentNotice {
        PaymentNotice {
            reference: reference.to_string(),
            invoice_id,
            amount,
            status: "PAID".to_string(),
        }
    }

    #[tokio::test]
    async fn purchase_invoice_is_taxed_and_registers_user() {
        let fx = fixture().await;
        let channel = FakeChannel::default();
        let inv = created(
            fx.service
                .create_purchase_invoice(&kim(), 2015, 230, &channel)
                .await
                .unwrap(),
        );

        assert_eq!(inv.amount, 1110);
        assert_eq!(inv.running_man_video_episode, Some(230));
        assert_eq!(channel.opened.load(Ordering::SeqCst), 1);
        assert!(fx.ledger.user(7).await.is_some());
        assert!(fx.ledger.invoice(inv.id).await.is_some());
    }

    #[tokio::test]
    async fn second_purchase_while_valid_is_denied_without_new_row() {
        let fx = fixture().await;
        created(buy(&fx).await);

        match buy(&fx).await {
            InvoiceOutcome::Denied(DeniedReason::InvoiceAlreadyValid) => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(fx.ledger.invoices_for(7).await.len(), 1);
    }

    #[tokio::test]
    async fn expired_invoice_allows_a_new_one() {
        let fx = fixture().await;
        let first = created(buy(&fx).await);
        fx.ledger
            .set_invoice_expiry(first.id, Utc::now() - Duration::minutes(1))
            .await;

        let second = created(buy(&fx).await);
        assert_ne!(first.id, second.id);
        assert_eq!(fx.ledger.invoices_for(7).await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_episode_is_denied() {
        let fx = fixture().await;
        let out = fx
            .service
            .create_purchase_invoice(&kim(), 2015, 999, &FakeChannel::default())
            .await
            .unwrap();
        assert!(matches!(
            out,
            InvoiceOutcome::Denied(DeniedReason::UnknownEpisode)
        ));
    }

    #[tokio::test]
    async fn channel_failure_rolls_back_the_invoice() {
        let fx = fixture().await;
        let channel = FakeChannel {
            fail: true,
            ..Default::default()
        };
        let res = fx
            .service
            .create_purchase_invoice(&kim(), 2015, 230, &channel)
            .await;

        assert!(res.is_err());
        assert!(fx.ledger.invoices_for(7).await.is_empty());
    }

    #[tokio::test]
    async fn paid_notice_grants_ownership_once() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);
        fx.cache
            .set(&collection_key(7), encode_i32s(&[]), crate::cache::COLLECTION_TTL)
            .await;

        let first = fx.service.reconcile(&paid("ch_1", inv.id, 1110)).await.unwrap();
        let replay = fx.service.reconcile(&paid("ch_1", inv.id, 1110)).await.unwrap();

        assert_eq!(first, Reconciliation::Applied);
        assert_eq!(replay, Reconciliation::Duplicate);
        assert!(fx.ledger.owns(7, 230).await);
        assert_eq!(fx.ledger.invoice(inv.id).await.unwrap().status, InvoiceStatus::Used);
        assert_eq!(fx.ledger.payments().await.len(), 1);
        assert_eq!(fx.notifier.sent().len(), 1);
        assert!(fx.cache.get(&collection_key(7)).await.is_none());
    }

    #[tokio::test]
    async fn owned_episode_cannot_be_bought_again() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);
        fx.service.reconcile(&paid("ch_1", inv.id, 1110)).await.unwrap();

        assert!(matches!(
            buy(&fx).await,
            InvoiceOutcome::Denied(DeniedReason::AlreadyOwned)
        ));
    }

    #[tokio::test]
    async fn second_reference_for_settled_invoice_is_recorded_only() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);
        fx.service.reconcile(&paid("ch_1", inv.id, 1110)).await.unwrap();

        let again = fx.service.reconcile(&paid("ch_2", inv.id, 1110)).await.unwrap();

        assert_eq!(again, Reconciliation::AlreadySettled);
        assert_eq!(fx.ledger.payments().await.len(), 2);
        assert_eq!(fx.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_notice_marks_invoice_and_points_to_support() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);
        let notice = PaymentNotice {
            status: "EXPIRED".to_string(),
            ..paid("T1", inv.id, 1110)
        };

        let res = fx.service.reconcile(&notice).await.unwrap();

        assert_eq!(res, Reconciliation::Failed);
        assert!(!fx.ledger.owns(7, 230).await);
        assert_eq!(fx.ledger.invoice(inv.id).await.unwrap().status, InvoiceStatus::Failed);
        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("/support"));
    }

    #[tokio::test]
    async fn notification_failure_rolls_back_and_can_be_redelivered() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);

        fx.notifier.fail.store(true, Ordering::SeqCst);
        assert!(fx.service.reconcile(&paid("ch_1", inv.id, 1110)).await.is_err());
        assert!(!fx.ledger.owns(7, 230).await);
        assert!(fx.ledger.payments().await.is_empty());
        assert_eq!(fx.ledger.invoice(inv.id).await.unwrap().status, InvoiceStatus::Created);

        fx.notifier.fail.store(false, Ordering::SeqCst);
        let res = fx.service.reconcile(&paid("ch_1", inv.id, 1110)).await.unwrap();
        assert_eq!(res, Reconciliation::Applied);
        assert!(fx.ledger.owns(7, 230).await);
    }

    #[tokio::test]
    async fn subscription_payment_extends_thirty_days() {
        let fx = fixture().await;
        let channel = FakeChannel {
            gateway: true,
            ..Default::default()
        };
        let inv = created(
            fx.service
                .create_subscription_invoice(&kim(), &channel)
                .await
                .unwrap(),
        );
        assert_eq!(inv.amount, 30_000);
        assert!(inv.reference.is_some());
        assert_eq!(
            fx.service.payable_url(inv.id).await.unwrap().as_deref(),
            Some("https://tripay.example/checkout/1")
        );

        let before = Utc::now();
        let res = fx
            .service
            .reconcile(&paid("T-ref", inv.id, 30_000))
            .await
            .unwrap();
        assert_eq!(res, Reconciliation::Applied);

        let exp = fx.ledger.user(7).await.unwrap().subscription_expired_at.unwrap();
        assert!(exp >= before + Duration::days(30));
        assert!(exp <= Utc::now() + Duration::days(30));
        assert_eq!(fx.service.payable_url(inv.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn subscription_payment_keeps_cached_collection() {
        let fx = fixture().await;
        fx.cache
            .set(&collection_key(7), encode_i32s(&[118]), crate::cache::COLLECTION_TTL)
            .await;
        let channel = FakeChannel {
            gateway: true,
            ..Default::default()
        };
        let inv = created(
            fx.service
                .create_subscription_invoice(&kim(), &channel)
                .await
                .unwrap(),
        );

        fx.service
            .reconcile(&paid("T-ref", inv.id, 30_000))
            .await
            .unwrap();

        assert_eq!(fx.cache.get(&collection_key(7)).await, Some(encode_i32s(&[118])));
    }

    #[tokio::test]
    async fn unknown_invoice_is_an_error() {
        let fx = fixture().await;
        let res = fx.service.reconcile(&paid("x", Uuid::new_v4(), 1)).await;
        assert!(matches!(res, Err(PaymentError::UnknownInvoice(_))));
    }

    #[tokio::test]
    async fn validation_reports_used_and_expired() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);
        let v = fx.service.validate_invoice(inv.id).await.unwrap();
        assert!(v.is_payable());

        fx.service.reconcile(&paid("ch_1", inv.id, 1110)).await.unwrap();
        let v = fx.service.validate_invoice(inv.id).await.unwrap();
        assert!(v.used);
        assert!(!v.expired);
    }

    #[tokio::test]
    async fn checkout_rejects_stale_or_foreign_invoices() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);

        assert_eq!(
            fx.service.check_checkout(inv.id, 7).await.unwrap(),
            CheckoutVerdict::Accept
        );
        assert!(matches!(
            fx.service.check_checkout(inv.id, 8).await.unwrap(),
            CheckoutVerdict::Reject(_)
        ));

        fx.ledger
            .set_invoice_expiry(inv.id, Utc::now() - Duration::seconds(1))
            .await;
        assert!(matches!(
            fx.service.check_checkout(inv.id, 7).await.unwrap(),
            CheckoutVerdict::Reject(_)
        ));
    }

    async fn flaky_fixture() -> (Fixture, Arc<FlakyLedger>, PaymentService) {
        let fx = fixture().await;
        let flaky = Arc::new(FlakyLedger {
            inner: fx.ledger.clone(),
            ..Default::default()
        });
        let service = PaymentService::new(
            flaky.clone(),
            fx.notifier.clone(),
            fx.cache.clone(),
            30_000,
        );
        (fx, flaky, service)
    }

    #[tokio::test]
    async fn reconcile_survives_a_dropped_connection() {
        let (fx, flaky, service) = flaky_fixture().await;
        let inv = created(buy(&fx).await);
        flaky.pool_timeouts.store(1, Ordering::SeqCst);

        let res = service.reconcile(&paid("ch_1", inv.id, 1110)).await.unwrap();

        assert_eq!(res, Reconciliation::Applied);
        assert_eq!(flaky.begins.load(Ordering::SeqCst), 2);
        assert!(fx.ledger.owns(7, 230).await);
        assert_eq!(fx.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn reconcile_gives_up_after_three_timeouts() {
        let (fx, flaky, service) = flaky_fixture().await;
        let inv = created(buy(&fx).await);
        flaky.pool_timeouts.store(5, Ordering::SeqCst);

        assert!(service.reconcile(&paid("ch_1", inv.id, 1110)).await.is_err());
        assert_eq!(flaky.begins.load(Ordering::SeqCst), crate::retry::ATTEMPTS);
        assert!(!fx.ledger.owns(7, 230).await);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let (fx, flaky, service) = flaky_fixture().await;
        let inv = created(buy(&fx).await);
        flaky.broken.store(true, Ordering::SeqCst);

        assert!(service.reconcile(&paid("ch_1", inv.id, 1110)).await.is_err());
        assert_eq!(flaky.begins.load(Ordering::SeqCst), 1);

        let res = service.reconcile(&paid("x", Uuid::new_v4(), 1)).await;
        assert!(matches!(res, Err(PaymentError::UnknownInvoice(_))));
        assert_eq!(flaky.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invoice_creation_retries_begin() {
        let (fx, flaky, service) = flaky_fixture().await;
        flaky.pool_timeouts.store(1, Ordering::SeqCst);

        let inv = created(
            service
                .create_purchase_invoice(&kim(), 2015, 230, &FakeChannel::default())
                .await
                .unwrap(),
        );

        assert_eq!(flaky.begins.load(Ordering::SeqCst), 2);
        assert!(fx.ledger.invoice(inv.id).await.is_some());
    }

    #[tokio::test]
    async fn second_subscription_while_valid_is_denied_without_new_row() {
        let fx = fixture().await;
        let channel = FakeChannel {
            gateway: true,
            ..Default::default()
        };
        created(
            fx.service
                .create_subscription_invoice(&kim(), &channel)
                .await
                .unwrap(),
        );

        let again = fx
            .service
            .create_subscription_invoice(&kim(), &channel)
            .await
            .unwrap();

        assert!(matches!(
            again,
            InvoiceOutcome::Denied(DeniedReason::InvoiceAlreadyValid)
        ));
        assert_eq!(channel.opened.load(Ordering::SeqCst), 1);
        assert_eq!(fx.ledger.invoices_for(7).await.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_deliveries_apply_once() {
        let fx = fixture().await;
        let inv = created(buy(&fx).await);
        let notice = paid("ch_1", inv.id, 1110);

        let (a, b) = tokio::join!(fx.service.reconcile(&notice), fx.service.reconcile(&notice));

        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o == Reconciliation::Duplicate);
        assert_eq!(outcomes, vec![Reconciliation::Applied, Reconciliation::Duplicate]);
        assert!(fx.ledger.owns(7, 230).await);
        assert_eq!(fx.ledger.payments().await.len(), 1);
        assert_eq!(fx.notifier.sent().len(), 1);
    }
}
