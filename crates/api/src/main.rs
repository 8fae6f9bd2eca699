use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sigboard_core::api::http::HttpRecommendationApi;
use sigboard_core::api::{RecommendationApi, RefreshAllOutcome, WatchlistAction};
use sigboard_core::domain::Signal;
use sigboard_core::orchestrator::{
    AddOutcome, DashboardView, Orchestrator, OrchestratorError, RefreshOutcome,
};
use sigboard_core::view::ViewMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = sigboard_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let api = Arc::new(HttpRecommendationApi::from_settings(&settings)?);
    let orch = Arc::new(Orchestrator::new(api, settings.predict_delay));

    let poller = tokio::spawn(Arc::clone(&orch).run_polling(settings.poll_interval, shutdown_signal()));

    let app = router(AppState { orch }).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.abort();
    Ok(())
}

fn router<A: RecommendationApi + 'static>(state: AppState<A>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/dashboard", get(get_dashboard::<A>))
        .route("/dashboard/filter", post(set_filter::<A>))
        .route("/dashboard/search", post(set_search::<A>))
        .route("/dashboard/view-mode", post(set_view_mode::<A>))
        .route("/dashboard/refresh", post(refresh::<A>))
        .route("/recommendations/refresh-all", post(refresh_all::<A>))
        .route("/recommendations/:symbol/refresh", post(predict_symbol::<A>))
        .route(
            "/watchlist/:symbol",
            post(add_symbol::<A>).delete(remove_symbol::<A>),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

struct AppState<A> {
    orch: Arc<Orchestrator<A>>,
}

impl<A> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            orch: Arc::clone(&self.orch),
        }
    }
}

#[derive(Debug)]
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl From<sigboard_core::api::FetchError> for ApiError {
    fn from(err: sigboard_core::api::FetchError) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::ConfirmationRequired => StatusCode::CONFLICT,
            OrchestratorError::EmptySymbol => StatusCode::BAD_REQUEST,
            OrchestratorError::Fetch(_) => StatusCode::BAD_GATEWAY,
        };
        let message = match &self.0 {
            OrchestratorError::Fetch(err) => err.message().to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            success: false,
            message,
        };
        (status, Json(body)).into_response()
    }
}

async fn get_dashboard<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
) -> Json<DashboardView> {
    Json(state.orch.view().await)
}

#[derive(Debug, Deserialize)]
struct FilterRequest {
    /// Absent or null selects "All".
    #[serde(default)]
    filter: Option<Signal>,
}

async fn set_filter<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
    Json(req): Json<FilterRequest>,
) -> Json<DashboardView> {
    Json(state.orch.set_filter(req.filter).await)
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
}

async fn set_search<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
    Json(req): Json<SearchRequest>,
) -> Json<DashboardView> {
    Json(state.orch.set_search(&req.query).await)
}

#[derive(Debug, Deserialize)]
struct ViewModeRequest {
    view_mode: ViewMode,
}

async fn set_view_mode<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
    Json(req): Json<ViewModeRequest>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    let outcome = state.orch.set_view_mode(req.view_mode).await?;
    let _ = state.orch.maybe_start_auto_predict().await;
    Ok(Json(outcome))
}

async fn refresh<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    Ok(Json(state.orch.poll_once().await?))
}

async fn predict_symbol<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
    Path(symbol): Path<String>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    Ok(Json(state.orch.predict_symbol(&symbol).await?))
}

async fn add_symbol<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
    Path(symbol): Path<String>,
) -> Result<Json<AddOutcome>, ApiError> {
    Ok(Json(state.orch.add_symbol(&symbol).await?))
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    action: WatchlistAction,
}

async fn remove_symbol<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
    Path(symbol): Path<String>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let action = state.orch.remove_symbol(&symbol).await?;
    Ok(Json(RemoveResponse { action }))
}

#[derive(Debug, Default, Deserialize)]
struct RefreshAllRequest {
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Serialize)]
struct RefreshAllResponse {
    outcome: RefreshAllOutcome,
}

async fn refresh_all<A: RecommendationApi + 'static>(
    State(state): State<AppState<A>>,
    Json(req): Json<RefreshAllRequest>,
) -> Result<Json<RefreshAllResponse>, ApiError> {
    let outcome = state.orch.refresh_all(req.confirm).await?;
    Ok(Json(RefreshAllResponse { outcome }))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &sigboard_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use sigboard_core::api::mock::{MockCall, MockRecommendationApi};
    use sigboard_core::api::Scope;
    use sigboard_core::domain::RecommendationRecord;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(api: MockRecommendationApi) -> (Router, Arc<Orchestrator<MockRecommendationApi>>) {
        let orch = Arc::new(Orchestrator::new(Arc::new(api), Duration::ZERO));
        let app = router(AppState {
            orch: Arc::clone(&orch),
        });
        (app, orch)
    }

    fn records() -> Vec<RecommendationRecord> {
        serde_json::from_value(json!([
            {"symbol": "NBL", "current_price": 240, "predicted_price": 260,
             "last_updated": "2024-01-01", "recommendation": 1},
            {"symbol": "HBL", "current_price": 100, "predicted_price": 90,
             "last_updated": "2024-01-01", "recommendation": -1},
        ]))
        .unwrap()
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn healthz_ok() {
        let (app, _) = app(MockRecommendationApi::new());
        let res = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn refresh_then_dashboard_shows_rows_and_counts() {
        let (app, _) = app(MockRecommendationApi::new().with_records(records()));

        let (status, body) = send(&app, Method::POST, "/dashboard/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "applied");
        assert_eq!(body["records"], 2);

        let (status, body) = send(&app, Method::GET, "/dashboard", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["counts"]["buy"], 1);
        assert_eq!(body["counts"]["sell"], 1);
        assert_eq!(body["rows"][0]["symbol"], "NBL");
        assert_eq!(body["rows"][0]["state"], "resolved");
        assert_eq!(body["rows"][0]["change_pct"], "+8.33");
    }

    #[tokio::test]
    async fn filter_reprojects_without_fetching() {
        let (app, orch) = app(MockRecommendationApi::new().with_records(records()));
        send(&app, Method::POST, "/dashboard/refresh", None).await;

        let (status, body) =
            send(&app, Method::POST, "/dashboard/filter", Some(json!({"filter": "SELL"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows"].as_array().unwrap().len(), 1);
        assert_eq!(body["rows"][0]["symbol"], "HBL");
        assert_eq!(body["active_filter"], "SELL");
        assert_eq!(orch.api().fetch_count(), 1);
    }

    #[tokio::test]
    async fn refresh_all_on_market_needs_confirm() {
        let (app, orch) = app(MockRecommendationApi::new());
        let (status, _) = send(
            &app,
            Method::POST,
            "/dashboard/view-mode",
            Some(json!({"view_mode": "all_market"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            send(&app, Method::POST, "/recommendations/refresh-all", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (status, body) = send(
            &app,
            Method::POST,
            "/recommendations/refresh-all",
            Some(json!({"confirm": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "completed");
        assert!(orch.api().calls().contains(&MockCall::RefreshAll(Scope::All)));
    }

    #[tokio::test]
    async fn watchlist_add_and_remove() {
        let (app, orch) = app(MockRecommendationApi::new());

        let (status, body) = send(&app, Method::POST, "/watchlist/newco", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "added");
        assert!(body["prediction_error"].is_null());

        let (status, body) = send(&app, Method::DELETE, "/watchlist/NEWCO", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "removed");

        assert_eq!(orch.api().refreshed_symbols(), vec!["NEWCO"]);
    }

    #[tokio::test]
    async fn backend_failure_maps_to_bad_gateway() {
        let (app, _) = app(MockRecommendationApi::new().with_failing_refresh("SCB"));

        let (status, body) = send(&app, Method::POST, "/recommendations/SCB/refresh", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    }
}
