use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{Extension, Path};
use axum::http::{Method, StatusCode, Uri};
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use settings_loader::common::http::HttpServerSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::reconciler::{ReconcileReport, ReconcileStatus};
use super::service::{EngineApiError, EngineCmd, EngineServiceApi, MetricsSpan};

struct State {
    tx_api: EngineServiceApi,
}

/// Binds the admin API listener and serves it on a background task.
#[tracing::instrument(level = "info", skip(tx_api))]
pub async fn run_http_server(
    tx_api: EngineServiceApi, settings: &HttpServerSettings,
) -> Result<JoinHandle<Result<(), EngineApiError>>, EngineApiError> {
    let address = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&address).await?.into_std()?;
    tracing::info!("rollup engine API listening on {}", address);

    let app = make_router(tx_api);
    let server = axum::Server::from_tcp(listener)?.serve(app.into_make_service());
    Ok(tokio::spawn(async move { server.await.map_err(EngineApiError::from) }))
}

fn make_router(tx_api: EngineServiceApi) -> Router {
    let shared_state = Arc::new(State { tx_api });

    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_engine_error))
        .timeout(Duration::from_secs(10))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(shared_state))
        .into_inner();

    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/metrics/:span", get(get_metrics))
        .route("/reconcile", post(post_reconcile))
        .layer(middleware_stack)
}

#[tracing::instrument(level = "info", skip(engine))]
async fn get_health(
    Extension(engine): Extension<Arc<State>>,
) -> Result<(StatusCode, Json<ReconcileStatus>), EngineApiError> {
    let (cmd, rx) = EngineCmd::check_health();
    engine.tx_api.send(cmd)?;
    let status = rx.await?;
    let code = match status {
        ReconcileStatus::Ready { .. } => StatusCode::OK,
        ReconcileStatus::Starting | ReconcileStatus::Degraded { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((code, Json(status)))
}

#[tracing::instrument(level = "info", skip(engine))]
async fn get_metrics(
    span: Option<Path<MetricsSpan>>, Extension(engine): Extension<Arc<State>>,
) -> Result<String, EngineApiError> {
    let span = match span {
        Some(Path(s)) => s,
        None => MetricsSpan::default(),
    };

    let (cmd, rx) = EngineCmd::gather_metrics(span);
    engine.tx_api.send(cmd)?;
    rx.await?.map(|mr| mr.0)
}

#[tracing::instrument(level = "info", skip(engine))]
async fn post_reconcile(Extension(engine): Extension<Arc<State>>) -> Result<Json<ReconcileReport>, EngineApiError> {
    let (cmd, rx) = EngineCmd::reconcile();
    engine.tx_api.send(cmd)?;
    rx.await?.map(Json)
}

#[tracing::instrument(level = "info", skip())]
async fn handle_engine_error(method: Method, uri: Uri, error: BoxError) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("`{} {}` failed with {}", method, uri, error),
    )
}
