use anyhow::{Context, Result};
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct CollectionRepository {
    pool: PgPool,
}

impl CollectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_episodes(&self, user_id: i64) -> Result<Vec<i32>> {
        sqlx::query_scalar::<_, i32>(
            "SELECT running_man_video_episode FROM video_collections WHERE user_id = $1 ORDER BY running_man_video_episode",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch user collection")
    }

    pub async fn owns(&self, user_id: i64, episode: i32) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM video_collections WHERE user_id = $1 AND running_man_video_episode = $2)",
        )
        .bind(user_id)
        .bind(episode)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check video ownership")
    }
}
