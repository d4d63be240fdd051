use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::user::{Customer, User};

#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by ID")
    }

    /// Inserts the user on first contact and refreshes the stored first name afterwards.
    pub async fn register(&self, customer: &Customer) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, first_name, created_at)
            VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE SET first_name = EXCLUDED.first_name
            RETURNING *
            "#,
        )
        .bind(customer.id)
        .bind(&customer.first_name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to register user")
    }
}
