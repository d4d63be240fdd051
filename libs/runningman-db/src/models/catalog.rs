use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Video {
    pub id: Uuid,
    pub episode: i32,
    pub running_man_library_id: i64,
    pub price: i64,
}

/// Everything needed to sign a playback link for one episode.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct VideoRef {
    pub video_id: Uuid,
    pub library_id: i64,
    pub year: i32,
    pub episode: i32,
}

/// One episode as shown in the catalog, with the year of its library.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct VideoListing {
    pub year: i32,
    pub episode: i32,
    pub price: i64,
}
