//! Reports parties attached to no application (abandoned signups or failed saves).
//!
//! Read-only: nothing is deleted.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

#[derive(sqlx::FromRow)]
struct OrphanRow {
    id: uuid::Uuid,
    first_name: Option<String>,
    last_name: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Main entry point for the report.
///
/// Counts parties that are neither a primary borrower nor a linked co-borrower,
/// ignoring anything created in the last hour (a save may still be in flight).
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database. Looking for orphaned parties...");

    let orphans = sqlx::query_as::<_, OrphanRow>(
        r#"
        SELECT p.id, p.first_name, p.last_name, p.created_at
        FROM parties p
        WHERE NOT EXISTS (SELECT 1 FROM deals d WHERE d.primary_borrower_id = p.id)
          AND NOT EXISTS (SELECT 1 FROM deal_co_borrowers c WHERE c.party_id = p.id)
          AND p.created_at < NOW() - INTERVAL '1 hour'
        ORDER BY p.created_at
        "#,
    )
    .fetch_all(&pool)
    .await?;

    for orphan in &orphans {
        tracing::debug!(
            "orphan {} ({} {}) created {}",
            orphan.id,
            orphan.first_name.as_deref().unwrap_or("-"),
            orphan.last_name.as_deref().unwrap_or("-"),
            orphan.created_at
        );
    }

    tracing::info!("Report complete. {} orphaned parties found.", orphans.len());
    println!("{}", orphans.len());

    Ok(())
}
