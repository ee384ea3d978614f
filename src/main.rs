use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use article_digest::config::Config;
use article_digest::extract::ExtractedText;
use article_digest::orchestrator::validate_url;
use article_digest::{init_tracing, mcp, types::*, AppState, Error};

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(false);

    let config = Config::from_env();
    info!("Starting article digest server");
    info!("Summarizer model: {}", config.summarizer.model);
    info!("Search index: {}", config.search.base_url);

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::from_config(config)?);
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/summarize", post(submit_handler))
        .route("/summarize/:job_id", get(status_handler))
        .route("/extract", post(extract_handler))
        .route("/papers/search", get(search_handler))
        .route("/mcp/tools", get(mcp::list_tools))
        .route("/mcp/call", post(mcp::call_tool))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: Error) -> (StatusCode, Json<ErrorResponse>) {
    let status = e.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            retry_after_secs: e.retry_after_secs(),
        }),
    )
}

/// Malformed or incomplete bodies are caller mistakes, reported like any other.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| error_response(Error::Validation(rejection.body_text())))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "article-digest",
        "version": env!("CARGO_PKG_VERSION"),
        "renderer": state.service.extractor().has_renderer(),
        "jobs": state.service.registry().job_count().await,
    }))
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let request = json_body(payload)?;
    state
        .service
        .submit(&request.url)
        .await
        .map(|response| (StatusCode::ACCEPTED, Json(response)))
        .map_err(error_response)
}

async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    state
        .service
        .status(&job_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn extract_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExtractRequest>, JsonRejection>,
) -> ApiResult<Json<ExtractedText>> {
    let request = json_body(payload)?;
    let url = validate_url(&request.url).map_err(error_response)?;
    state
        .service
        .extractor()
        .extract(&url, request.mode)
        .await
        .map(Json)
        .map_err(|e| error_response(e.into()))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    state
        .search
        .search(&query.keyword, query.limit)
        .await
        .map(|papers| Json(SearchResponse { papers }))
        .map_err(error_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tokio_test::assert_ok;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = AppState::from_config(Config::default()).unwrap();
        app(Arc::new(state))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = assert_ok!(app.oneshot(request).await);
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(
            test_app(),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["jobs"], 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_url() {
        let (status, body) = send(
            test_app(),
            post_json("/summarize", serde_json::json!({"url": "not-a-url"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("http://"));
        assert!(body.get("retryAfterSecs").is_none());
    }

    #[tokio::test]
    async fn test_submit_without_url_is_a_validation_error() {
        for body in [serde_json::json!({}), serde_json::json!({"url": 42})] {
            let (status, body) = send(test_app(), post_json("/summarize", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"]
                .as_str()
                .unwrap()
                .starts_with("validation error"));
        }

        let (status, body) = send(
            test_app(),
            Request::post("/summarize")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (status, body) = send(
            test_app(),
            Request::get("/summarize/0190f5d2a0b07c3e8c1b9a5e3f6d7a11")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("job not found"));
    }

    #[tokio::test]
    async fn test_extract_validates_before_fetching() {
        let (status, _) = send(
            test_app(),
            post_json("/extract", serde_json::json!({"url": "ftp://example.com", "mode": "fast"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_requires_keyword() {
        let (status, _) = send(
            test_app(),
            Request::get("/papers/search?keyword=%20&limit=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mcp_routes() {
        let (status, body) = send(
            test_app(),
            Request::get("/mcp/tools").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tools"].as_array().unwrap().len(), 3);

        let (status, body) = send(
            test_app(),
            post_json("/mcp/call", serde_json::json!({"name": "nope", "arguments": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown tool: nope");

        let (status, body) = send(
            test_app(),
            post_json(
                "/mcp/call",
                serde_json::json!({"name": "get_summarization_status", "arguments": {"jobId": "x"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_error"], true);
    }
}
