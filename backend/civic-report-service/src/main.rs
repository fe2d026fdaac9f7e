use actix_web::{web, App, HttpServer};
use anyhow::Context;
use civic_report_service::db::{MemoryStore, NotificationOutbox, PgStore};
use civic_report_service::handlers::{self, AppState, UploadDir};
use civic_report_service::metrics;
use civic_report_service::services::{
    EvidenceStore, LocalEvidenceStore, NotificationInbox, NotificationRelay,
};
use civic_report_service::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,actix_web=info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_json);

    tracing::info!(
        host = %config.host,
        port = config.port,
        staff_radius_m = config.policy.staff_geofence_meters,
        citizen_radius_m = config.policy.citizen_geofence_meters,
        "Starting civic-report-service"
    );

    let evidence: Arc<dyn EvidenceStore> = Arc::new(LocalEvidenceStore::new(&config.upload_dir));

    let (state, outbox): (AppState, Arc<dyn NotificationOutbox>) = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .context("Failed to connect to database")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run database migrations")?;
            tracing::info!("Database connected and migrated");

            let store = Arc::new(PgStore::new(pool));
            let inbox = Arc::new(NotificationInbox::new(store.clone()));
            let state = AppState::new(store.clone(), evidence, inbox, config.policy.clone());
            (state, store as Arc<dyn NotificationOutbox>)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; state is kept in memory and lost on restart");
            let store = Arc::new(MemoryStore::new());
            let inbox = Arc::new(NotificationInbox::new(store.clone()));
            let state = AppState::new(store.clone(), evidence, inbox, config.policy.clone());
            (state, store as Arc<dyn NotificationOutbox>)
        }
    };

    for staff_id in &config.staff_ids {
        state
            .lifecycle
            .assignments()
            .register_staff(*staff_id)
            .await
            .context("Failed to seed staff directory")?;
    }

    let relay = NotificationRelay::new(outbox, state.inbox.clone(), config.relay.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay_task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    let state = web::Data::new(state);
    let upload_dir = web::Data::new(UploadDir(config.upload_dir.clone()));
    let max_evidence_bytes = config.policy.max_evidence_bytes;

    let bind_address = format!("{}:{}", config.host, config.port);
    tracing::info!(address = %bind_address, "HTTP server listening");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(upload_dir.clone())
            .app_data(handlers::json_config(max_evidence_bytes))
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .route("/uploads/{file_name}", web::get().to(handlers::serve_upload))
            .configure(handlers::register_routes)
    })
    .bind(&bind_address)
    .with_context(|| format!("Failed to bind {}", bind_address))?
    .run()
    .await
    .context("HTTP server error")?;

    shutdown_tx.send(true).ok();
    if let Err(e) = relay_task.await {
        tracing::error!(error = %e, "Notification relay task failed");
    }

    tracing::info!("civic-report-service stopped");
    Ok(())
}
