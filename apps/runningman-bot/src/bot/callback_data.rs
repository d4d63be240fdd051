//! Inline button payloads: `{type}:{params}`, params separated by `,`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Telegram rejects callback data longer than this.
pub const MAX_CALLBACK_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackData {
    Libraries,
    VideoList { year: i32 },
    VideoItem { year: i32, episode: i32 },
    VideoLink { episode: i32 },
    Invoice { year: i32, episode: i32 },
    SubscriptionInvoice,
    InvoiceProcessor { invoice_id: Uuid },
    VideoCollection,
    VideoCollectionItem { episode: i32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallbackDataError {
    #[error("callback data has no type separator: {0:?}")]
    MissingSeparator(String),
    #[error("unknown callback type {0:?}")]
    UnknownType(String),
    #[error("bad parameters for {kind}: {params:?}")]
    BadParams { kind: &'static str, params: String },
}

const LIBRARIES: &str = "libraries";
const VIDEO_LIST: &str = "video_list";
const VIDEO_ITEM: &str = "video_item";
const VIDEO_LINK: &str = "video_link";
const INVOICE: &str = "invoice";
const INVOICE_PROCESSOR: &str = "invoice_processor";
const VIDEO_COLLECTION: &str = "video_collection";
const VIDEO_COLLECTION_ITEM: &str = "video_collection_item";
const SUBSCRIPTION: &str = "subscription";

impl fmt::Display for CallbackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackData::Libraries => write!(f, "{}:", LIBRARIES),
            CallbackData::VideoList { year } => write!(f, "{}:{}", VIDEO_LIST, year),
            CallbackData::VideoItem { year, episode } => {
                write!(f, "{}:{},{}", VIDEO_ITEM, year, episode)
            }
            CallbackData::VideoLink { episode } => write!(f, "{}:{}", VIDEO_LINK, episode),
            CallbackData::Invoice { year, episode } => write!(f, "{}:{},{}", INVOICE, year, episode),
            CallbackData::SubscriptionInvoice => write!(f, "{}:{}", INVOICE, SUBSCRIPTION),
            CallbackData::InvoiceProcessor { invoice_id } => {
                write!(f, "{}:{}", INVOICE_PROCESSOR, invoice_id)
            }
            CallbackData::VideoCollection => write!(f, "{}:", VIDEO_COLLECTION),
            CallbackData::VideoCollectionItem { episode } => {
                write!(f, "{}:{}", VIDEO_COLLECTION_ITEM, episode)
            }
        }
    }
}

fn one_int(kind: &'static str, params: &str) -> Result<i32, CallbackDataError> {
    params.parse().map_err(|_| CallbackDataError::BadParams {
        kind,
        params: params.to_string(),
    })
}

fn two_ints(kind: &'static str, params: &str) -> Result<(i32, i32), CallbackDataError> {
    let bad = || CallbackDataError::BadParams {
        kind,
        params: params.to_string(),
    };
    let (a, b) = params.split_once(',').ok_or_else(bad)?;
    Ok((a.parse().map_err(|_| bad())?, b.parse().map_err(|_| bad())?))
}

impl FromStr for CallbackData {
    type Err = CallbackDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, params) = s
            .split_once(':')
            .ok_or_else(|| CallbackDataError::MissingSeparator(s.to_string()))?;

        match kind {
            LIBRARIES => Ok(CallbackData::Libraries),
            VIDEO_LIST => Ok(CallbackData::VideoList {
                year: one_int(VIDEO_LIST, params)?,
            }),
            VIDEO_ITEM => {
                let (year, episode) = two_ints(VIDEO_ITEM, params)?;
                Ok(CallbackData::VideoItem { year, episode })
            }
            VIDEO_LINK => Ok(CallbackData::VideoLink {
                episode: one_int(VIDEO_LINK, params)?,
            }),
            INVOICE if params == SUBSCRIPTION => Ok(CallbackData::SubscriptionInvoice),
            INVOICE => {
                let (year, episode) = two_ints(INVOICE, params)?;
                Ok(CallbackData::Invoice { year, episode })
            }
            INVOICE_PROCESSOR => {
                let invoice_id = Uuid::parse_str(params).map_err(|_| CallbackDataError::BadParams {
                    kind: INVOICE_PROCESSOR,
                    params: params.to_string(),
                })?;
                Ok(CallbackData::InvoiceProcessor { invoice_id })
            }
            VIDEO_COLLECTION => Ok(CallbackData::VideoCollection),
            VIDEO_COLLECTION_ITEM => Ok(CallbackData::VideoCollectionItem {
                episode: one_int(VIDEO_COLLECTION_ITEM, params)?,
            }),
            other => Err(CallbackDataError::UnknownType(other.to_string())),
        }
    }
}
