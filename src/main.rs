use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::info;

use route_optimizer::{
    analytics, astar, greedy, hybrid, routing, Algorithm, Courier, Error, HybridSolveOptions,
    HybridSolveResponse, OptimizeRequest, OptimizeResponse, Order,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/optimize", post(optimize))
        .route("/api/optimize-analytics", post(optimize_analytics))
        .route("/api/solve-hybrid", post(solve_hybrid));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    info!(%addr, "route optimizer listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind {}: {}", addr, err);
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        eprintln!("server error: {}", err);
        std::process::exit(1);
    }
}

async fn health() -> Json<serde_json::Value> {
    let api_key_set = std::env::var(routing::API_KEY_ENV)
        .map(|key| !key.is_empty())
        .unwrap_or(false);
    Json(serde_json::json!({
        "status": "ok",
        "service": "route-optimizer",
        "apiKeySet": api_key_set,
    }))
}

async fn optimize(
    Json(request): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, ApiError> {
    let response = greedy::optimize(&request.orders, &request.couriers)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsRequest {
    orders: Vec<Order>,
    #[serde(rename = "shoppers")]
    couriers: Vec<Courier>,
    #[serde(default)]
    use_real_routes: bool,
    #[serde(default = "default_algorithm")]
    algorithm: Algorithm,
    #[serde(default)]
    api_key: Option<String>,
}

fn default_algorithm() -> Algorithm {
    Algorithm::NearestNeighbor
}

async fn optimize_analytics(
    Json(request): Json<AnalyticsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let optimization = match request.algorithm {
        Algorithm::NearestNeighbor => greedy::optimize(&request.orders, &request.couriers)?,
        Algorithm::AStar => astar::optimize_astar(&request.orders, &request.couriers)?,
        Algorithm::Hybrid => {
            return Err(ApiError(Error::InvalidInput(
                "hybrid runs through the solve-hybrid endpoint".to_string(),
            )))
        }
    };

    let analytics = analytics::from_assignments(
        &request.orders,
        &request.couriers,
        &optimization.assignments,
        request.use_real_routes,
        request.api_key.as_deref(),
    )
    .await;

    Ok(Json(serde_json::json!({
        "optimization": optimization,
        "analytics": analytics,
        "algorithm": request.algorithm,
    })))
}

#[derive(Deserialize)]
struct HybridRequest {
    orders: Vec<Order>,
    #[serde(rename = "shoppers")]
    couriers: Vec<Courier>,
    #[serde(default)]
    options: HybridSolveOptions,
}

async fn solve_hybrid(
    Json(request): Json<HybridRequest>,
) -> Result<Json<HybridSolveResponse>, ApiError> {
    let HybridRequest {
        orders,
        couriers,
        options,
    } = request;

    let solver_orders = orders.clone();
    let solver_couriers = couriers.clone();
    let solver_options = options.clone();
    let mut response = tokio::task::spawn_blocking(move || {
        hybrid::solve(&solver_orders, &solver_couriers, &solver_options)
    })
    .await
    .map_err(|err| ApiError(Error::InvariantBroken(format!("solver task failed: {}", err))))??;

    response.analytics = Some(
        analytics::from_assignments(
            &orders,
            &couriers,
            &response.optimization.assignments,
            options.use_real_routes,
            if options.api_key.is_empty() {
                None
            } else {
                Some(options.api_key.as_str())
            },
        )
        .await,
    );

    Ok(Json(response))
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Cancelled | Error::InvariantBroken(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
