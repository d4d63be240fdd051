use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::catalog::{Video, VideoListing, VideoRef};

#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_years(&self) -> Result<Vec<i32>> {
        sqlx::query_scalar::<_, i32>("SELECT year FROM running_man_libraries ORDER BY year")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch library years")
    }

    pub async fn get_episodes_by_year(&self, year: i32) -> Result<Vec<i32>> {
        sqlx::query_scalar::<_, i32>(
            r#"
            SELECT v.episode FROM running_man_videos v
            JOIN running_man_libraries l ON l.id = v.running_man_library_id
            WHERE l.year = $1
            ORDER BY v.episode
            "#,
        )
        .bind(year)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch episodes for year")
    }

    pub async fn get_video(&self, episode: i32) -> Result<Option<Video>> {
        sqlx::query_as::<_, Video>("SELECT * FROM running_man_videos WHERE episode = $1")
            .bind(episode)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch video by episode")
    }

    pub async fn get_video_ref(&self, episode: i32) -> Result<Option<VideoRef>> {
        sqlx::query_as::<_, VideoRef>(
            r#"
            SELECT v.id AS video_id, l.id AS library_id, l.year, v.episode
            FROM running_man_videos v
            JOIN running_man_libraries l ON l.id = v.running_man_library_id
            WHERE v.episode = $1
            "#,
        )
        .bind(episode)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch video reference")
    }

    pub async fn get_video_listing(&self, episode: i32) -> Result<Option<VideoListing>> {
        sqlx::query_as::<_, VideoListing>(
            r#"
            SELECT l.year, v.episode, v.price
            FROM running_man_videos v
            JOIN running_man_libraries l ON l.id = v.running_man_library_id
            WHERE v.episode = $1
            "#,
        )
        .bind(episode)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch video listing")
    }
}
