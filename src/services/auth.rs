use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tracing::info;

use crate::{
    config::Config,
    db::{AccountStore, Store, StoreError},
    error::AppError,
    models::{
        auth::Claims,
        business::{slugify, Business, Role},
        user::{LoginResponse, RegisterRequest, RegisterResponse, User},
    },
    services::subscription::SubscriptionService,
};

pub struct AuthService;

impl AuthService {
    pub fn generate_access_token(user: &User, secret: &str, ttl_seconds: u64) -> anyhow::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user.id.to_string(),
            iat: now,
            exp: now + ttl_seconds as usize,
            super_admin: user.is_super_admin,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Creates the user, their first business (owner membership), makes it
    /// current and opens a trial.
    pub async fn register(
        store: &dyn Store,
        config: &Config,
        req: &RegisterRequest,
    ) -> Result<RegisterResponse, AppError> {
        let email = req.email.trim().to_lowercase();
        if req.name.trim().is_empty() || req.business_name.trim().is_empty() {
            return Err(AppError::validation("name and business_name are required"));
        }
        if !email.contains('@') {
            return Err(AppError::validation("email is invalid"));
        }
        if req.password.len() < 8 {
            return Err(AppError::validation("password must be at least 8 characters"));
        }

        let hash = bcrypt::hash(&req.password, config.bcrypt_cost).map_err(anyhow::Error::from)?;
        let user = store
            .create_user(req.name.trim(), &email, &hash)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => AppError::Conflict("Email is already registered".into()),
                other => other.into(),
            })?;

        let business = Self::create_business_for(store, config, &user, req.business_name.trim()).await?;
        let user = store.find_user(user.id).await?.ok_or(StoreError::NotFound)?;
        info!("Registered user {} with business {}", user.id, business.id);

        let access_token = Self::generate_access_token(&user, &config.jwt_secret, config.jwt_expiry_seconds)?;
        Ok(RegisterResponse {
            access_token,
            token_type: "Bearer",
            expires_in: config.jwt_expiry_seconds,
            user: user.into(),
            business,
        })
    }

    /// New business owned by `owner`, switched to and put on trial.
    pub async fn create_business_for(
        store: &dyn Store,
        config: &Config,
        owner: &User,
        name: &str,
    ) -> Result<Business, AppError> {
        if name.is_empty() {
            return Err(AppError::validation("business name is required"));
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let slug = format!("{}-{}", slugify(name), &suffix[..6]);

        let business = store.create_business(name, &slug, owner.id).await?;
        store
            .add_membership(business.id, owner.id, &Role::Owner.to_string())
            .await?;
        store.set_current_business(owner.id, Some(business.id)).await?;
        SubscriptionService::start_trial(store, business.id, config.trial_days).await?;
        Ok(business)
    }

    pub async fn login(
        store: &dyn Store,
        config: &Config,
        email: &str,
        password: &str,
    ) -> Result<LoginResponse, AppError> {
        let invalid = || AppError::Unauthenticated("Invalid credentials".into());

        let user = store.find_user_by_email(email.trim()).await?.ok_or_else(invalid)?;
        let valid = bcrypt::verify(password, &user.password_hash).map_err(|_| invalid())?;
        if !valid {
            return Err(invalid());
        }

        let access_token = Self::generate_access_token(&user, &config.jwt_secret, config.jwt_expiry_seconds)?;
        Ok(LoginResponse {
            access_token,
            token_type: "Bearer",
            expires_in: config.jwt_expiry_seconds,
            user: user.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::decode_access_token;

    #[test]
    fn token_round_trip_carries_identity() {
        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4(),
            name: "Malika".into(),
            email: "malika@example.uz".into(),
            password_hash: String::new(),
            is_super_admin: true,
            current_business_id: None,
            created_at: now,
            updated_at: now,
        };
        let token = AuthService::generate_access_token(&user, "secret", 60).unwrap();
        let decoded = decode_access_token(&token, "secret").unwrap();
        assert_eq!(decoded.user_id, user.id);
        assert!(decoded.is_super_admin);
        assert!(decode_access_token(&token, "other-secret").is_err());
    }
}
