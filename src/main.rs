use std::sync::Arc;

use nc_followup::api::{self, ApiState};
use nc_followup::config::{FollowupConfig, MailConfig, parse_schedule};
use nc_followup::error::Result;
use nc_followup::followup::{
    FollowupSweep, LeadService, MessageIngest, ReengagementDetector, StageCache, ticker,
};
use nc_followup::mail::{TemplateMailer, TemplateSender};
use nc_followup::store::{Database, LibSqlBackend};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = FollowupConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // Initialize tracing. The guard must live until shutdown to flush the file writer.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let _log_guard = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "nc-followup.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    };

    eprintln!("📬 NC Follow-up v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Sweep schedule: {}", config.sweep_schedule);
    eprintln!("   API: http://0.0.0.0:{}/api", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Stages ───────────────────────────────────────────────────────────
    let stages = Arc::new(StageCache::new(
        Arc::clone(&db),
        config.stage_names.clone(),
    ));
    if config.seed_stages {
        let created = stages.seed_missing().await?;
        if !created.is_empty() {
            eprintln!("   Seeded {} follow-up stages", created.len());
        }
    }
    let missing = stages.warm().await?;
    if missing.is_empty() {
        eprintln!("   Stages: all resolved");
    } else {
        eprintln!(
            "   Stages: missing {} (sweep disabled until created)",
            missing
                .iter()
                .map(|r| stages.name_for(*r))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    // ── Mail ─────────────────────────────────────────────────────────────
    let mail_config = MailConfig::from_env()?;
    match &mail_config {
        Some(cfg) => eprintln!("   SMTP: {}:{}", cfg.smtp_host, cfg.smtp_port),
        None => eprintln!("   SMTP: not configured (follow-ups will fail to send)"),
    }
    let mailer: Arc<dyn TemplateSender> = Arc::new(TemplateMailer::new(Arc::clone(&db), mail_config));

    // ── Follow-up flow ───────────────────────────────────────────────────
    let leads = Arc::new(LeadService::new(Arc::clone(&db), Arc::clone(&stages)));
    let sweep = Arc::new(FollowupSweep::new(
        Arc::clone(&leads),
        Arc::clone(&stages),
        mailer,
    ));
    let detector = Arc::new(ReengagementDetector::new(
        Arc::clone(&leads),
        Arc::clone(&stages),
        config.channel_marker.clone(),
    ));
    let ingest = Arc::new(MessageIngest::new(Arc::clone(&leads), detector));

    let schedule = parse_schedule(&config.sweep_schedule)?;
    if let Some(next) = ticker::next_sweep_fire(&schedule) {
        eprintln!("   Next sweep: {next}");
    }
    let _ticker_handle = ticker::spawn_sweep_ticker(Arc::clone(&sweep), schedule);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api::router(ApiState {
        leads,
        stages,
        sweep,
        ingest,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    tracing::info!(port = config.http_port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
