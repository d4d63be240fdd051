//! Tripay closed-payment client and callback signature checks.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::TripayConfig;

type HmacSha256 = Hmac<Sha256>;

const PAYMENT_METHOD: &str = "QRIS";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TripayError {
    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
    #[error("request to Tripay failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Tripay rejected the transaction: {0}")]
    Rejected(String),
    #[error("Tripay reported success without transaction data")]
    MissingData,
}

impl TripayError {
    pub fn is_transient(&self) -> bool {
        match self {
            TripayError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItem {
    pub name: String,
    pub price: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub merchant_ref: String,
    pub amount: i64,
    pub customer_name: String,
    pub order_items: Vec<OrderItem>,
}

#[derive(Debug, Serialize)]
struct TransactionRequest<'a> {
    method: &'a str,
    merchant_ref: &'a str,
    amount: i64,
    customer_name: &'a str,
    customer_email: &'a str,
    order_items: &'a [OrderItem],
    signature: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<Transaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transaction {
    pub reference: String,
    pub amount: i64,
    /// Unix seconds.
    pub expired_time: i64,
    #[serde(default)]
    pub qr_url: Option<String>,
    #[serde(default)]
    pub checkout_url: Option<String>,
}

impl Transaction {
    pub fn payment_url(&self) -> Option<&str> {
        self.checkout_url.as_deref().or(self.qr_url.as_deref())
    }
}

/// Body sent by Tripay to the callback URL.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackPayload {
    pub reference: String,
    pub merchant_ref: String,
    pub total_amount: i64,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct TripayClient {
    http: reqwest::Client,
    url: String,
    merchant_code: String,
    api_key: String,
    private_key: String,
    customer_email: String,
}

impl TripayClient {
    pub fn new(config: &TripayConfig) -> Result<Self, TripayError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            merchant_code: config.merchant_code.clone(),
            api_key: config.api_key.clone(),
            private_key: config.private_key.clone(),
            customer_email: config.customer_email.clone(),
        })
    }

    /// `hex(HMAC-SHA256(private_key, merchant_code || merchant_ref || amount))`
    pub fn transaction_signature(&self, merchant_ref: &str, amount: i64) -> Result<String, TripayError> {
        let message = format!("{}{}{}", self.merchant_code, merchant_ref, amount);
        hmac_hex(&self.private_key, message.as_bytes())
    }

    pub async fn create_transaction(&self, tx: &NewTransaction) -> Result<Transaction, TripayError> {
        let body = TransactionRequest {
            method: PAYMENT_METHOD,
            merchant_ref: &tx.merchant_ref,
            amount: tx.amount,
            customer_name: &tx.customer_name,
            customer_email: &self.customer_email,
            order_items: &tx.order_items,
            signature: self.transaction_signature(&tx.merchant_ref, tx.amount)?,
        };

        debug!("Requesting Tripay transaction for {}", tx.merchant_ref);
        let res = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        // Tripay reports business errors in the envelope with a 4xx status
        let res = if res.status().is_server_error() {
            res.error_for_status()?
        } else {
            res
        };

        let envelope: Envelope = res.json().await?;
        if !envelope.success {
            return Err(TripayError::Rejected(envelope.message));
        }
        let transaction = envelope.data.ok_or(TripayError::MissingData)?;
        info!(
            "Tripay transaction {} created for {}",
            transaction.reference, tx.merchant_ref
        );
        Ok(transaction)
    }
}

fn hmac_hex(key: &str, message: &[u8]) -> Result<String, TripayError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| TripayError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signature Tripay puts in `X-Callback-Signature` for a raw callback body.
pub fn callback_signature(private_key: &str, body: &[u8]) -> Result<String, TripayError> {
    hmac_hex(private_key, body)
}

/// Constant-time comparison of a hex signature against the raw body.
pub fn verify_callback(private_key: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(private_key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TripayClient {
        TripayClient::new(&TripayConfig {
            url: "http://127.0.0.1:9/api/transaction/create".to_string(),
            merchant_code: "T0001".to_string(),
            api_key: "api".to_string(),
            private_key: "private".to_string(),
            customer_email: "c@example.com".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn transaction_signature_covers_code_ref_and_amount() {
        let c = client();
        let sig = c.transaction_signature("INV-1", 30000).unwrap();
        assert_eq!(sig, hmac_hex("private", b"T0001INV-130000").unwrap());
        assert_ne!(sig, c.transaction_signature("INV-1", 30001).unwrap());
    }

    #[test]
    fn callback_roundtrip_verifies() {
        let body = br#"{"reference":"T1","merchant_ref":"x","total_amount":1,"status":"PAID"}"#;
        let sig = callback_signature("private", body).unwrap();
        assert!(verify_callback("private", body, &sig));
        assert!(!verify_callback("other", body, &sig));
    }

    #[test]
    fn single_flipped_byte_fails_verification() {
        let body = b"{\"status\":\"PAID\"}".to_vec();
        let sig = callback_signature("private", &body).unwrap();

        let mut tampered = body.clone();
        tampered[3] ^= 0x01;
        assert!(!verify_callback("private", &tampered, &sig));
    }

    #[test]
    fn garbage_signature_is_rejected() {
        assert!(!verify_callback("private", b"{}", "not-hex"));
        assert!(!verify_callback("private", b"{}", ""));
    }

    #[test]
    fn envelope_failure_carries_message() {
        let env: Envelope =
            serde_json::from_str(r#"{"success":false,"message":"Invalid signature","data":null}"#)
                .unwrap();
        assert!(!env.success);
        assert_eq!(env.message, "Invalid signature");
        assert!(env.data.is_none());
    }

    #[test]
    fn payment_url_prefers_checkout_page() {
        let tx: Transaction = serde_json::from_str(
            r#"{"reference":"T1","amount":30000,"expired_time":1700000000,"qr_url":"https://qr","checkout_url":"https://checkout"}"#,
        )
        .unwrap();
        assert_eq!(tx.payment_url(), Some("https://checkout"));
    }
}
