use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec,
};
use tracing::{info, warn};

use crate::db::Store;
use crate::services::limits::month_start;

lazy_static! {
    // ── Event counters ──────────────────────────────────────────────────────
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "api_logins_total",
        "Login attempts by status",
        &["status"]
    ).unwrap();

    pub static ref LIMIT_REJECTIONS: CounterVec = register_counter_vec!(
        "api_limit_rejections_total",
        "Requests rejected by a plan limit, by resource",
        &["resource"]
    ).unwrap();

    pub static ref CHAT_LEADS_COUNTER: CounterVec = register_counter_vec!(
        "api_chatbot_leads_total",
        "Chatbot lead creation attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref INTENTS_COUNTER: CounterVec = register_counter_vec!(
        "api_chatbot_intents_total",
        "Classified inbound messages by intent",
        &["intent"]
    ).unwrap();

    pub static ref ANALYSIS_COUNTER: CounterVec = register_counter_vec!(
        "api_call_analysis_total",
        "Finished call analysis jobs by final status",
        &["status"]
    ).unwrap();

    // ── Business metrics ────────────────────────────────────────────────────
    pub static ref BUSINESSES_GAUGE: Gauge = register_gauge!(
        "biznespilot_businesses_total",
        "Number of businesses"
    ).unwrap();

    pub static ref MEMBERS_GAUGE: GaugeVec = register_gauge_vec!(
        "biznespilot_members_total",
        "Team members per business",
        &["business"]
    ).unwrap();

    pub static ref LEADS_GAUGE: GaugeVec = register_gauge_vec!(
        "biznespilot_leads_month_total",
        "Leads created this month per business",
        &["business"]
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(store: Arc<dyn Store>) {
    tokio::spawn(async move {
        if let Err(e) = collect(store.as_ref()).await {
            warn!("Metrics: initial collection failed: {}", e);
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(store.as_ref()).await {
                warn!("Metrics: collection failed: {}", e);
            }
        }
    });
}

async fn collect(store: &dyn Store) -> anyhow::Result<()> {
    let businesses = store.list_businesses().await?;
    BUSINESSES_GAUGE.set(businesses.len() as f64);

    let since = month_start(chrono::Utc::now());
    for business in &businesses {
        let members = store.count_team_members(business.id).await.unwrap_or(0);
        MEMBERS_GAUGE.with_label_values(&[&business.slug]).set(members as f64);

        let leads = store
            .count_leads_created_since(business.id, since)
            .await
            .unwrap_or(0);
        LEADS_GAUGE.with_label_values(&[&business.slug]).set(leads as f64);
    }

    info!("Metrics: collected for {} business(es)", businesses.len());
    Ok(())
}
