use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{
    middleware::auth::JwtSecret,
    models::{
        dream_buyer::DreamBuyer, kpi::KpiDailyActual, lead::Lead, offer::Offer, pipeline::PipelineStage,
    },
    routes::{self, crud},
    AppState,
};

/// Allow the app base domain and its subdomains. Localhost is always allowed
/// for local development.
fn cors_layer(base_url: String) -> CorsLayer {
    let origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        if o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") {
            return true;
        }
        if o == base_url {
            return true;
        }
        if let Some(idx) = base_url.find("://") {
            let after_scheme = &base_url[idx + 3..];
            let domain = after_scheme.split('/').next().unwrap_or(after_scheme);
            let domain_clean = domain.split(':').next().unwrap_or(domain);
            if o.contains(&format!(".{domain_clean}")) {
                return true;
            }
        }
        false
    });

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-business-id"),
            header::HeaderName::from_static("x-super-admin-key"),
        ]))
        .allow_origin(origin)
}

pub fn router(state: AppState) -> Router {
    let jwt_secret = JwtSecret(state.config.jwt_secret.clone());
    let cors = cors_layer(state.config.app_base_url.clone());

    Router::new()
        // Health
        .route("/health/ping", get(routes::health::ping))
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .route("/health/status", get(routes::health::status))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Auth
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/me", get(routes::auth::me))
        // Businesses and team
        .route(
            "/api/v1/businesses",
            get(routes::businesses::list_businesses).post(routes::businesses::create_business),
        )
        .route("/api/v1/businesses/{id}/switch", post(routes::businesses::switch_business))
        .route("/api/v1/team", get(routes::team::list_team).post(routes::team::add_member))
        .route("/api/v1/team/{user_id}", delete(routes::team::remove_member))
        // Billing
        .route("/api/v1/billing/plans", get(routes::billing::list_plans))
        .route("/api/v1/billing/subscription", get(routes::billing::current_subscription))
        .route("/api/v1/billing/usage", get(routes::billing::usage))
        .route("/api/v1/billing/change-plan", post(routes::billing::change_plan))
        // CRM
        .merge(crud::resource::<Lead>("/api/v1/leads"))
        .merge(crud::resource::<Offer>("/api/v1/offers"))
        .merge(crud::resource::<KpiDailyActual>("/api/v1/kpis"))
        .merge(crud::resource::<DreamBuyer>("/api/v1/dream-buyers"))
        .merge(crud::resource::<PipelineStage>("/api/v1/pipeline-stages"))
        // Calls
        .route("/api/v1/calls", get(routes::calls::list_calls).post(routes::calls::create_call))
        .route("/api/v1/calls/analyze-bulk", post(routes::calls::analyze_bulk))
        .route("/api/v1/calls/{id}", get(routes::calls::get_call))
        .route("/api/v1/calls/{id}/analyze", post(routes::calls::analyze_call))
        // Chatbot
        .route("/api/v1/chatbot/classify", post(routes::chatbot::classify))
        .route("/api/v1/chatbot/leads/stats", get(routes::chatbot::lead_stats))
        .route(
            "/api/v1/chatbot/accounts",
            get(routes::chatbot::list_accounts).post(routes::chatbot::connect_account),
        )
        .route("/api/v1/chatbot/conversations", get(routes::chatbot::list_conversations))
        .route("/api/v1/chatbot/conversations/{id}/assign", post(routes::chatbot::assign_conversation))
        .route("/api/v1/chatbot/conversations/{id}/close", post(routes::chatbot::close_conversation))
        .route("/api/v1/chatbot/conversations/{id}/lead", post(routes::chatbot::create_conversation_lead))
        .route(
            "/webhooks/instagram",
            get(routes::webhooks::verify).post(routes::webhooks::receive),
        )
        // Super-admin
        .route("/api/v1/admin/leads", get(routes::admin::list_all_leads))
        .route("/api/v1/admin/businesses", get(routes::admin::list_all_businesses))
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .with_state(state)
}
