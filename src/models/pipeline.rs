use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::{tenant_row_accessors, PgQueryAs, TenantOwned};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PipelineStage {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub slug: String,
    pub sort_order: i32,
    pub is_won: bool,
    pub is_lost: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantOwned for PipelineStage {
    const TABLE: &'static str = "pipeline_stages";
    const COLUMNS: &'static [&'static str] = &["name", "slug", "sort_order", "is_won", "is_lost"];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.name)
            .bind(&self.slug)
            .bind(self.sort_order)
            .bind(self.is_won)
            .bind(self.is_lost)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreatePipelineStageRequest {
    pub name: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default)]
    pub is_won: bool,
    #[serde(default)]
    pub is_lost: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePipelineStageRequest {
    pub name: Option<String>,
    pub sort_order: Option<i32>,
    pub is_won: Option<bool>,
    pub is_lost: Option<bool>,
}
