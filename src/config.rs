use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_seconds: u64,
    pub bcrypt_cost: u32,
    pub host: String,
    pub port: u16,
    pub super_admin_key: String,
    pub app_base_url: String,
    /// Local directory the service must be able to write to.
    pub storage_dir: String,
    // Instagram (optional)
    pub instagram_verify_token: Option<String>,
    pub instagram_graph_url: String,
    // Speech-to-text / analysis provider (optional)
    pub analysis_api_url: Option<String>,
    pub analysis_api_key: Option<String>,
    pub analysis_max_attempts: u32,
    // Plans and chatbot tuning
    pub trial_days: i64,
    pub lead_dedup_seconds: u64,
    pub leads_per_minute: u64,
    pub bulk_analyze_max: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expiry_seconds: env::var("JWT_EXPIRY_SECONDS")
                .unwrap_or_else(|_| "86400".into())
                .parse()?,
            bcrypt_cost: env::var("BCRYPT_COST")
                .unwrap_or_else(|_| "12".into())
                .parse()?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            super_admin_key: env::var("SUPER_ADMIN_KEY")
                .unwrap_or_else(|_| "change_this_super_admin_key".into()),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost".into()),
            storage_dir: env::var("STORAGE_DIR").unwrap_or_else(|_| "/data/storage".into()),
            instagram_verify_token: optional("INSTAGRAM_VERIFY_TOKEN"),
            instagram_graph_url: env::var("INSTAGRAM_GRAPH_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".into()),
            analysis_api_url: optional("ANALYSIS_API_URL"),
            analysis_api_key: optional("ANALYSIS_API_KEY"),
            analysis_max_attempts: env::var("ANALYSIS_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".into())
                .parse()?,
            trial_days: env::var("TRIAL_DAYS")
                .unwrap_or_else(|_| "14".into())
                .parse()?,
            lead_dedup_seconds: env::var("LEAD_DEDUP_SECONDS")
                .unwrap_or_else(|_| "60".into())
                .parse()?,
            leads_per_minute: env::var("LEADS_PER_MINUTE")
                .unwrap_or_else(|_| "3".into())
                .parse()?,
            bulk_analyze_max: env::var("BULK_ANALYZE_MAX")
                .unwrap_or_else(|_| "10".into())
                .parse()?,
        })
    }

    /// Settings for tests and local runs against the in-memory backends.
    pub fn for_tests() -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            jwt_secret: "test-secret-key-that-is-long-enough".into(),
            jwt_expiry_seconds: 3600,
            bcrypt_cost: 4,
            host: "127.0.0.1".into(),
            port: 0,
            super_admin_key: "test-super-admin-key".into(),
            app_base_url: "http://localhost".into(),
            storage_dir: env::temp_dir().join("biznespilot-test").to_string_lossy().into_owned(),
            instagram_verify_token: Some("verify-me".into()),
            instagram_graph_url: "http://127.0.0.1:9".into(),
            analysis_api_url: None,
            analysis_api_key: None,
            analysis_max_attempts: 3,
            trial_days: 14,
            lead_dedup_seconds: 60,
            leads_per_minute: 3,
            bulk_analyze_max: 10,
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}
