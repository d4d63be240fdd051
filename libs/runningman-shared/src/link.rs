use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use runningman_db::models::catalog::VideoRef;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Signed links stop opening after this many seconds.
pub const LINK_TTL_SECS: i64 = 180;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignError {
    #[error("no signing secret configured for {0}")]
    MissingSecret(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLink {
    pub url: String,
    pub token: String,
    pub expires: i64,
}

#[derive(Debug, Clone)]
pub struct LinkSigner {
    base_url: String,
    secrets: BTreeMap<i32, String>,
}

impl LinkSigner {
    pub fn new(base_url: impl Into<String>, secrets: BTreeMap<i32, String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secrets,
        }
    }

    pub fn sign(&self, video: &VideoRef, now: DateTime<Utc>) -> Result<SignedLink, SignError> {
        let secret = self
            .secrets
            .get(&video.year)
            .ok_or(SignError::MissingSecret(video.year))?;

        let expires = now.timestamp() + LINK_TTL_SECS;
        let token = token(secret, &video.video_id, expires);
        let url = format!(
            "{}/{}/{}?token={}&expires={}",
            self.base_url, video.library_id, video.video_id, token, expires
        );

        Ok(SignedLink { url, token, expires })
    }
}

/// `hex(sha256(secret || video_id || expires))`, the format the player verifies.
pub fn token(secret: &str, video_id: &Uuid, expires: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(video_id.to_string().as_bytes());
    hasher.update(expires.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn link_message(episode: i32, link: &SignedLink) -> String {
    format!(
        "Running Man episode {}:\n{}\n\nThe link is valid for 3 minutes. A player you already opened keeps playing after it expires.",
        episode, link.url
    )
}
