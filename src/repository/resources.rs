//! Resources repository

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::resource::Resource,
};

use super::ResourceStore;

#[derive(Clone)]
pub struct ResourcesRepository {
    pool: Pool<Postgres>,
}

impl ResourcesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceStore for ResourcesRepository {
    async fn get_by_id(&self, id: i64) -> AppResult<Resource> {
        sqlx::query_as::<_, Resource>(
            "SELECT * FROM resources WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resource with id {} not found", id)))
    }
}
