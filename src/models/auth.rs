use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims embedded in the JWT access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user UUID
    pub exp: usize,
    pub iat: usize,
    #[serde(default)]
    pub super_admin: bool,
}

/// Extracted from the validated JWT. The active business is not part of the
/// token; it is resolved per request so that switching takes effect at once.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub is_super_admin: bool,
}
