use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::{
    db::TenantOwned,
    error::AppError,
    models::{
        business::slugify,
        dream_buyer::{CreateDreamBuyerRequest, DreamBuyer, UpdateDreamBuyerRequest},
        kpi::{normalize_features, CreateKpiRequest, KpiDailyActual, UpdateKpiRequest},
        lead::{CreateLeadRequest, Lead, LeadStatus, UpdateLeadRequest},
        offer::{CreateOfferRequest, Offer, UpdateOfferRequest},
        pipeline::{CreatePipelineStageRequest, PipelineStage, UpdatePipelineStageRequest},
        plan::Resource,
    },
    services::access::Permission,
};

/// A tenant-owned row exposed through the generic CRUD routes.
pub trait CrudEntity: TenantOwned + Serialize {
    type Create: DeserializeOwned + Send + 'static;
    type Update: DeserializeOwned + Send + 'static;

    /// Singular display name used in error messages.
    const NAME: &'static str;
    /// `None` lets any member of the business read.
    const READ: Option<Permission> = None;
    const WRITE: Permission;
    /// Plan resource consumed by each create.
    const QUOTA: Option<Resource> = None;

    /// New row with a nil `business_id`, unless the request names one
    /// (only honoured for cross-tenant callers).
    fn from_create(req: Self::Create) -> Result<Self, AppError>;
    fn apply_update(&mut self, req: Self::Update) -> Result<(), AppError>;
}

fn required(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

impl CrudEntity for Lead {
    type Create = CreateLeadRequest;
    type Update = UpdateLeadRequest;

    const NAME: &'static str = "Lead";
    const READ: Option<Permission> = Some(Permission::LeadsRead);
    const WRITE: Permission = Permission::LeadsWrite;
    const QUOTA: Option<Resource> = Some(Resource::MonthlyLeads);

    fn from_create(req: CreateLeadRequest) -> Result<Self, AppError> {
        let mut lead = Lead::new(
            required(&req.name, "name")?,
            req.source.unwrap_or_else(|| "manual".into()),
        );
        lead.business_id = req.business_id.unwrap_or_else(Uuid::nil);
        lead.phone = req.phone;
        lead.email = req.email;
        lead.status = req.status.unwrap_or(LeadStatus::New).as_str().to_string();
        lead.estimated_value = req.estimated_value;
        Ok(lead)
    }

    fn apply_update(&mut self, req: UpdateLeadRequest) -> Result<(), AppError> {
        if let Some(name) = req.name {
            self.name = required(&name, "name")?;
        }
        if req.phone.is_some() {
            self.phone = req.phone;
        }
        if req.email.is_some() {
            self.email = req.email;
        }
        if let Some(status) = req.status {
            self.status = status.as_str().to_string();
        }
        if req.estimated_value.is_some() {
            self.estimated_value = req.estimated_value;
        }
        Ok(())
    }
}

impl CrudEntity for Offer {
    type Create = CreateOfferRequest;
    type Update = UpdateOfferRequest;

    const NAME: &'static str = "Offer";
    const WRITE: Permission = Permission::MarketingWrite;

    fn from_create(req: CreateOfferRequest) -> Result<Self, AppError> {
        req.metadata.validate().map_err(AppError::Validation)?;
        let now = Utc::now();
        Ok(Offer {
            id: Uuid::new_v4(),
            business_id: Uuid::nil(),
            name: required(&req.name, "name")?,
            description: req.description,
            price: req.price,
            status: req.status.unwrap_or_else(|| "draft".into()),
            metadata: req.metadata,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    fn apply_update(&mut self, req: UpdateOfferRequest) -> Result<(), AppError> {
        if let Some(name) = req.name {
            self.name = required(&name, "name")?;
        }
        if req.description.is_some() {
            self.description = req.description;
        }
        if req.price.is_some() {
            self.price = req.price;
        }
        if let Some(status) = req.status {
            self.status = status;
        }
        if let Some(metadata) = req.metadata {
            metadata.validate().map_err(AppError::Validation)?;
            self.metadata = metadata;
        }
        Ok(())
    }
}

impl CrudEntity for KpiDailyActual {
    type Create = CreateKpiRequest;
    type Update = UpdateKpiRequest;

    const NAME: &'static str = "KPI entry";
    const WRITE: Permission = Permission::KpisWrite;

    fn from_create(req: CreateKpiRequest) -> Result<Self, AppError> {
        let now = Utc::now();
        Ok(KpiDailyActual {
            id: Uuid::new_v4(),
            business_id: Uuid::nil(),
            kpi_code: required(&req.kpi_code, "kpi_code")?,
            date: req.date,
            actual_value: req.actual_value,
            features: normalize_features(req.features).map_err(AppError::Validation)?,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    fn apply_update(&mut self, req: UpdateKpiRequest) -> Result<(), AppError> {
        if let Some(value) = req.actual_value {
            self.actual_value = value;
        }
        if let Some(features) = req.features {
            self.features = normalize_features(features).map_err(AppError::Validation)?;
        }
        Ok(())
    }
}

impl CrudEntity for DreamBuyer {
    type Create = CreateDreamBuyerRequest;
    type Update = UpdateDreamBuyerRequest;

    const NAME: &'static str = "Dream buyer";
    const WRITE: Permission = Permission::MarketingWrite;

    fn from_create(req: CreateDreamBuyerRequest) -> Result<Self, AppError> {
        req.target_audience.validate().map_err(AppError::Validation)?;
        let now = Utc::now();
        Ok(DreamBuyer {
            id: Uuid::new_v4(),
            business_id: Uuid::nil(),
            name: required(&req.name, "name")?,
            description: req.description,
            target_audience: req.target_audience,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    fn apply_update(&mut self, req: UpdateDreamBuyerRequest) -> Result<(), AppError> {
        if let Some(name) = req.name {
            self.name = required(&name, "name")?;
        }
        if req.description.is_some() {
            self.description = req.description;
        }
        if let Some(audience) = req.target_audience {
            audience.validate().map_err(AppError::Validation)?;
            self.target_audience = audience;
        }
        Ok(())
    }
}

impl CrudEntity for PipelineStage {
    type Create = CreatePipelineStageRequest;
    type Update = UpdatePipelineStageRequest;

    const NAME: &'static str = "Pipeline stage";
    const WRITE: Permission = Permission::PipelineManage;

    fn from_create(req: CreatePipelineStageRequest) -> Result<Self, AppError> {
        if req.is_won && req.is_lost {
            return Err(AppError::validation("a stage cannot be both won and lost"));
        }
        let name = required(&req.name, "name")?;
        let slug = req
            .slug
            .as_deref()
            .map(slugify)
            .unwrap_or_else(|| slugify(&name));
        let now = Utc::now();
        Ok(PipelineStage {
            id: Uuid::new_v4(),
            business_id: Uuid::nil(),
            name,
            slug,
            sort_order: req.sort_order,
            is_won: req.is_won,
            is_lost: req.is_lost,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    fn apply_update(&mut self, req: UpdatePipelineStageRequest) -> Result<(), AppError> {
        if let Some(name) = req.name {
            self.name = required(&name, "name")?;
        }
        if let Some(order) = req.sort_order {
            self.sort_order = order;
        }
        if let Some(won) = req.is_won {
            self.is_won = won;
        }
        if let Some(lost) = req.is_lost {
            self.is_lost = lost;
        }
        if self.is_won && self.is_lost {
            return Err(AppError::validation("a stage cannot be both won and lost"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::offer::{OfferMetadata, OfferTerms};

    #[test]
    fn lead_create_requires_a_name() {
        let req = CreateLeadRequest {
            name: "   ".into(),
            phone: None,
            email: None,
            status: None,
            source: None,
            estimated_value: None,
            business_id: None,
        };
        assert!(matches!(Lead::from_create(req), Err(AppError::Validation(_))));
    }

    #[test]
    fn offer_metadata_is_validated_on_update() {
        let mut offer = Offer::from_create(CreateOfferRequest {
            name: "Bahorgi chegirma".into(),
            description: None,
            price: Some(150_000),
            status: None,
            metadata: OfferMetadata::Terms(OfferTerms::Discount { percent: 20 }),
        })
        .unwrap();
        assert_eq!(offer.status, "draft");

        let bad = UpdateOfferRequest {
            name: None,
            description: None,
            price: None,
            status: None,
            metadata: Some(OfferMetadata::Terms(OfferTerms::Discount { percent: 120 })),
        };
        assert!(offer.apply_update(bad).is_err());
    }

    #[test]
    fn pipeline_slug_defaults_to_name() {
        let stage = PipelineStage::from_create(CreatePipelineStageRequest {
            name: "Muzokara bosqichi".into(),
            slug: None,
            sort_order: 3,
            is_won: false,
            is_lost: false,
        })
        .unwrap();
        assert_eq!(stage.slug, "muzokara-bosqichi");
    }
}
