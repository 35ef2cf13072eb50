/// Hard-delete soft-deleted CRM rows past their retention window.
/// Run daily (e.g., via cron job: 0 2 * * * /app/purge-trashed)
///
/// Usage: purge-trashed [--days N] [--business UUID] [--dry-run]
use chrono::{DateTime, Duration, Utc};
use clap::Parser;
use uuid::Uuid;

use biznespilot_api::{
    config::Config,
    db::{self, PgStore, Repository, TenantOwned, TenantScope, Trashed},
    models::{
        call::CallLog, dream_buyer::DreamBuyer, kpi::KpiDailyActual, lead::Lead, offer::Offer,
        pipeline::PipelineStage,
    },
};

#[derive(Parser)]
#[command(name = "purge-trashed", about = "Purge soft-deleted rows from the BiznesPilot database")]
struct Args {
    /// Keep rows trashed more recently than this many days
    #[arg(long, default_value_t = 90)]
    days: i64,

    /// Business to purge (optional, all if not specified)
    #[arg(long)]
    business: Option<Uuid>,

    /// Only count what would be deleted
    #[arg(long)]
    dry_run: bool,
}

async fn purge<T: TenantOwned>(
    store: &PgStore,
    scope: &TenantScope,
    before: DateTime<Utc>,
    dry_run: bool,
) -> anyhow::Result<u64>
where
    PgStore: Repository<T>,
{
    if dry_run {
        let trashed = Repository::<T>::list(store, scope, Trashed::Only).await?;
        return Ok(trashed
            .iter()
            .filter(|row| row.deleted_at().is_some_and(|at| at < before))
            .count() as u64);
    }
    Ok(Repository::<T>::purge_trashed(store, scope, before).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    if args.days < 0 {
        anyhow::bail!("--days must not be negative");
    }

    let config = Config::from_env()?;
    let pool = db::create_pool(&config.database_url).await?;
    let store = PgStore::new(pool);

    let scope = match args.business {
        Some(id) => TenantScope::for_business(id),
        None => TenantScope::all_tenants(),
    };
    let before = Utc::now() - Duration::days(args.days);

    tracing::info!(
        "Purging rows trashed before {} ({}){}",
        before,
        args.business.map_or("all businesses".to_string(), |id| format!("business {id}")),
        if args.dry_run { " [dry run]" } else { "" }
    );

    let results = [
        (Lead::TABLE, purge::<Lead>(&store, &scope, before, args.dry_run).await?),
        (Offer::TABLE, purge::<Offer>(&store, &scope, before, args.dry_run).await?),
        (KpiDailyActual::TABLE, purge::<KpiDailyActual>(&store, &scope, before, args.dry_run).await?),
        (DreamBuyer::TABLE, purge::<DreamBuyer>(&store, &scope, before, args.dry_run).await?),
        (PipelineStage::TABLE, purge::<PipelineStage>(&store, &scope, before, args.dry_run).await?),
        (CallLog::TABLE, purge::<CallLog>(&store, &scope, before, args.dry_run).await?),
    ];

    let mut total = 0;
    for (table, count) in results {
        tracing::info!("{table}: {count}");
        total += count;
    }
    tracing::info!(
        "Purge {}: {total} rows",
        if args.dry_run { "would remove" } else { "removed" }
    );

    Ok(())
}
