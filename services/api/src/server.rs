use crate::cli::ServeArgs;
use crate::infra::{sample_dataset, AppState, InMemoryScoreStore};
use crate::routes::with_ranking_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use stack_rank::config::AppConfig;
use stack_rank::error::AppError;
use stack_rank::ranking::{RankingService, ScoreStore};
use stack_rank::store::CsvScoreStore;
use stack_rank::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(data_dir) = args.data_dir.take() {
        config.data.data_dir = data_dir;
    }

    telemetry::init(&config.telemetry)?;

    if args.sample {
        let store = Arc::new(InMemoryScoreStore::new(sample_dataset()?));
        serve_with(config, store).await
    } else {
        let store = Arc::new(CsvScoreStore::new(
            config.data.data_dir.clone(),
            config.data.limits,
        ));
        serve_with(config, store).await
    }
}

async fn serve_with<S>(config: AppConfig, store: Arc<S>) -> Result<(), AppError>
where
    S: ScoreStore + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let ranking_service = Arc::new(RankingService::new(store, config.adjustment)?);
    if let Some(interval) = config.data.reload_interval {
        spawn_reload_poller(ranking_service.clone(), interval);
    }

    let app = with_ranking_routes(ranking_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        data_dir = %config.data.data_dir.display(),
        "ranking service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Picks up edits made to the tables outside the service. A failed check keeps serving the
/// last good snapshot.
fn spawn_reload_poller<S>(service: Arc<RankingService<S>>, period: Duration)
where
    S: ScoreStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; the snapshot was just loaded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(error) = service.refresh_if_modified() {
                warn!(%error, "background reload failed");
            }
        }
    });
}
