use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use serde::Serialize;
use shot_gate::Gate;
use shot_gate::GateConfig;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_gate::GateRejection;
use tower_gate::IdentityLimitLayer;
use tower_gate::query_param;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieInfo {
    movie_name: String,
    imdb_rating: Option<String>,
    rotten_tomato_score: Option<String>,
}

fn lookup_ratings(movie: &str) -> MovieInfo {
    let (imdb, tomato) = match movie {
        "ironman" => (Some("7.8"), Some("79%")),
        "darkknight" => (Some("9.3"), Some("88%")),
        "superman" => (Some("6.7"), Some("55%")),
        _ => (None, None),
    };
    MovieInfo {
        movie_name: movie.to_string(),
        imdb_rating: imdb.map(str::to_string),
        rotten_tomato_score: tomato.map(str::to_string),
    }
}

async fn get_ratings(Path(movie): Path<String>) -> Json<MovieInfo> {
    info!(%movie, "request being processed");
    // Stand-in for an expensive computation
    sleep(Duration::from_secs(3)).await;
    Json(lookup_ratings(&movie))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 1. Setup Gate: five concurrent requests per user
    let config = GateConfig::new(NonZeroUsize::new(5).unwrap());
    let gate: Arc<Gate> = Arc::new(Gate::new(config).unwrap());

    // 2. Setup the identity layer, keyed on ?userName=
    //    Requests still waiting for a permit fail with 503 on shutdown.
    let shutdown = CancellationToken::new();
    let gate_layer = IdentityLimitLayer::new(Arc::clone(&gate), query_param::<Body>("userName"))
        .with_cancellation(shutdown.clone());

    // 3. Build the Router
    let app = Router::new()
        .route("/getdata/{movie}", get(get_ratings))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_rejection))
                // 2. The middle layer: introduces BoxError
                .layer(gate_layer)
                // 3. Converts the Route's Infallible to BoxError
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000/getdata/ironman?userName=micky");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await
        .unwrap();

    gate.close().await;
}

async fn handle_rejection(err: BoxError) -> Response {
    if let Some(rejection) = err.downcast_ref::<GateRejection>() {
        rejection.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}

