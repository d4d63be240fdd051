use runningman_shared::payment::{CheckoutVerdict, PaymentNotice, PAID_STATUS};
use teloxide::prelude::*;
use teloxide::types::{PreCheckoutQuery, SuccessfulPayment};
use tracing::{error, info, warn};

use crate::services::checkout::InvoicePayload;
use crate::AppState;

const CHECKOUT_UNAVAILABLE: &str = "This invoice can't be paid right now. Please try again later.";

fn parse_payload(raw: &str) -> Option<InvoicePayload> {
    match serde_json::from_str(raw) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!("Unreadable invoice payload {:?}: {}", raw, e);
            None
        }
    }
}

/// Stars payments are keyed by Telegram's own charge id; the provider id is empty for them.
fn payment_notice(payment: &SuccessfulPayment) -> Option<PaymentNotice> {
    let payload = parse_payload(&payment.invoice_payload)?;
    Some(PaymentNotice {
        reference: payment.telegram_payment_charge_id.0.clone(),
        invoice_id: payload.id,
        amount: i64::from(payment.total_amount),
        status: PAID_STATUS.to_string(),
    })
}

pub async fn pre_checkout_handler(
    bot: Bot,
    q: PreCheckoutQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let verdict = match parse_payload(&q.invoice_payload) {
        Some(payload) => match state
            .payments
            .check_checkout(payload.id, q.from.id.0 as i64)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("Checkout check for {} failed: {:#}", payload.id, e);
                CheckoutVerdict::Reject(CHECKOUT_UNAVAILABLE.to_string())
            }
        },
        None => CheckoutVerdict::Reject(CHECKOUT_UNAVAILABLE.to_string()),
    };

    match verdict {
        CheckoutVerdict::Accept => {
            bot.answer_pre_checkout_query(q.id, true).await?;
        }
        CheckoutVerdict::Reject(reason) => {
            info!(user_id = q.from.id.0, %reason, "Checkout rejected");
            bot.answer_pre_checkout_query(q.id, false)
                .error_message(reason)
                .await?;
        }
    }
    Ok(())
}

/// The user hears about the outcome from the payment service's notifier.
pub async fn handle_successful_payment(
    msg: &Message,
    payment: &SuccessfulPayment,
    state: &AppState,
) {
    let Some(notice) = payment_notice(payment) else {
        error!(chat_id = msg.chat.id.0, "Successful payment without a readable payload");
        return;
    };

    match state.payments.reconcile(&notice).await {
        Ok(outcome) => info!(
            invoice_id = %notice.invoice_id,
            reference = %notice.reference,
            ?outcome,
            "Stars payment reconciled"
        ),
        Err(e) => error!(
            invoice_id = %notice.invoice_id,
            reference = %notice.reference,
            "Failed to reconcile Stars payment: {:#}",
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_payloads() {
        assert!(parse_payload("not json").is_none());
        assert!(parse_payload(r#"{"id":"nope","chat_id":1,"user_id":1,"episode":null}"#).is_none());
    }

    #[test]
    fn reads_subscription_payload() {
        let payload = parse_payload(
            r#"{"id":"0f8fad5b-d9cb-469f-a165-70867728950e","chat_id":10,"user_id":7,"episode":null}"#,
        )
        .unwrap();
        assert_eq!(payload.user_id, 7);
        assert_eq!(payload.episode, None);
    }

    fn stars_payment(charge_id: &str, provider_charge_id: &str) -> SuccessfulPayment {
        serde_json::from_value(serde_json::json!({
            "currency": "XTR",
            "total_amount": 1110,
            "invoice_payload": r#"{"id":"0f8fad5b-d9cb-469f-a165-70867728950e","chat_id":10,"user_id":7,"episode":230}"#,
            "telegram_payment_charge_id": charge_id,
            "provider_payment_charge_id": provider_charge_id,
        }))
        .unwrap()
    }

    #[test]
    fn notice_is_keyed_by_telegram_charge_id() {
        let notice = payment_notice(&stars_payment("stxAbC123", "")).unwrap();

        assert_eq!(notice.reference, "stxAbC123");
        assert_eq!(notice.invoice_id.to_string(), "0f8fad5b-d9cb-469f-a165-70867728950e");
        assert_eq!(notice.amount, 1110);
        assert_eq!(notice.status, PAID_STATUS);

        let with_provider = payment_notice(&stars_payment("stxAbC123", "prov_9")).unwrap();
        assert_eq!(with_provider.reference, "stxAbC123");
    }
}
