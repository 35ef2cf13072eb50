use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

use crate::db::{tenant_row_accessors, PgQueryAs, TenantOwned};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OfferTerms {
    Discount { percent: u8 },
    Bundle { items: Vec<String> },
    Guarantee { days: u32, terms: String },
}

/// Offer metadata: one of the known term shapes, or a free-form map for
/// anything else the front-end stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OfferMetadata {
    Terms(OfferTerms),
    Custom(Map<String, Value>),
}

impl Default for OfferMetadata {
    fn default() -> Self {
        OfferMetadata::Custom(Map::new())
    }
}

impl OfferMetadata {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            OfferMetadata::Terms(OfferTerms::Discount { percent }) if *percent == 0 || *percent > 100 => {
                Err("discount percent must be between 1 and 100".into())
            }
            OfferMetadata::Terms(OfferTerms::Bundle { items }) if items.iter().all(|i| i.trim().is_empty()) => {
                Err("bundle must list at least one item".into())
            }
            OfferMetadata::Terms(OfferTerms::Guarantee { days: 0, .. }) => {
                Err("guarantee must last at least one day".into())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Offer {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub status: String,
    #[sqlx(json)]
    pub metadata: OfferMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantOwned for Offer {
    const TABLE: &'static str = "offers";
    const COLUMNS: &'static [&'static str] = &["name", "description", "price", "status", "metadata"];

    tenant_row_accessors!();

    fn bind_columns<'q>(&'q self, query: PgQueryAs<'q, Self>) -> PgQueryAs<'q, Self> {
        query
            .bind(&self.name)
            .bind(&self.description)
            .bind(self.price)
            .bind(&self.status)
            .bind(sqlx::types::Json(&self.metadata))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOfferRequest {
    pub name: String,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: OfferMetadata,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOfferRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub status: Option<String>,
    pub metadata: Option<OfferMetadata>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_terms_parse_as_tagged_variants() {
        let meta: OfferMetadata = serde_json::from_value(json!({ "kind": "discount", "percent": 15 })).unwrap();
        assert_eq!(meta, OfferMetadata::Terms(OfferTerms::Discount { percent: 15 }));
    }

    #[test]
    fn unknown_shapes_fall_back_to_custom() {
        let meta: OfferMetadata =
            serde_json::from_value(json!({ "kind": "loyalty", "points": 200 })).unwrap();
        match meta {
            OfferMetadata::Custom(map) => assert_eq!(map["points"], json!(200)),
            other => panic!("expected custom metadata, got {other:?}"),
        }
    }

    #[test]
    fn discount_bounds_are_validated() {
        assert!(OfferMetadata::Terms(OfferTerms::Discount { percent: 0 }).validate().is_err());
        assert!(OfferMetadata::Terms(OfferTerms::Discount { percent: 30 }).validate().is_ok());
        assert!(OfferMetadata::Terms(OfferTerms::Bundle { items: vec![" ".into()] }).validate().is_err());
    }
}
