use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::{tenant_row_accessors, PgQueryAs, TenantOwned};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetAudience {
    pub age_min: Option<u8>,
    pub age_max: Option<u8>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
}

impl TargetAudience {
    pub fn validate(&self) -> Result<(), String> {
        if let (Some(min), Some(max)) = (self.age_min, self.age_max) {
            if min > max {
                return Err("age_min must not exceed age_max".into());
            }
        }
        Ok(())
    }
}

/// Ideal-customer profile used by marketing.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DreamBuyer {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(json)]
    pub target_audience: TargetAudience,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantOwned for DreamBuyer {
    const TABLE: &'static str = "dream_buyers";
    const COLUMNS: &'static [&'static str] = &["name", "description", "target_audience"];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.name)
            .bind(&self.description)
            .bind(sqlx::types::Json(&self.target_audience))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateDreamBuyerRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub target_audience: TargetAudience,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDreamBuyerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_audience: Option<TargetAudience>,
}
