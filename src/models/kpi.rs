use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::{tenant_row_accessors, PgQueryAs, TenantOwned};

/// One day's measured value for a KPI.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct KpiDailyActual {
    pub id: Uuid,
    pub business_id: Uuid,
    pub kpi_code: String,
    pub date: NaiveDate,
    pub actual_value: f64,
    /// Drivers noted for the day (e.g. "instagram_ads", "promo").
    #[sqlx(json)]
    pub features: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantOwned for KpiDailyActual {
    const TABLE: &'static str = "kpi_daily_actuals";
    const COLUMNS: &'static [&'static str] = &["kpi_code", "date", "actual_value", "features"];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.kpi_code)
            .bind(self.date)
            .bind(self.actual_value)
            .bind(sqlx::types::Json(&self.features))
    }
}

/// Trims entries and rejects blanks.
pub fn normalize_features(features: Vec<String>) -> Result<Vec<String>, String> {
    features
        .into_iter()
        .map(|f| {
            let trimmed = f.trim().to_string();
            if trimmed.is_empty() {
                Err("features must not contain empty values".to_string())
            } else {
                Ok(trimmed)
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct CreateKpiRequest {
    pub kpi_code: String,
    pub date: NaiveDate,
    pub actual_value: f64,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateKpiRequest {
    pub actual_value: Option<f64>,
    pub features: Option<Vec<String>>,
}
