//! IPAM Operator
//!
//! Reconciles IPAllocation resources against an external IPAM engine and
//! serves a health endpoint backed by the status broadcaster.

use clap::Parser;
use kube::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ipam_operator::engine::http::EngineConfig;
use ipam_operator::{
    controller, Context, Error, HealthBroadcaster, HttpAllocationEngine, KubeStore, Result,
    ServingStatus, CONTROLLER_SERVICE,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// IPAM Operator - IP allocation controller backed by an external engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IPAM engine API endpoint
    #[arg(long, env = "ENGINE_ENDPOINT", default_value = "http://ipam-engine:9080")]
    engine_endpoint: String,

    /// Engine request timeout in seconds
    #[arg(long, env = "ENGINE_TIMEOUT", default_value = "10")]
    engine_timeout_secs: u64,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting IPAM Operator");
    info!("  Version: {}", ipam_operator::VERSION);
    info!("  Engine: {}", args.engine_endpoint);
    info!("  Health: {}", args.health_addr);

    let client = Client::try_default().await?;

    let store = Arc::new(KubeStore::new(client.clone()));
    let engine = Arc::new(HttpAllocationEngine::new(EngineConfig {
        endpoint: args.engine_endpoint.clone(),
        timeout_secs: args.engine_timeout_secs,
    })?);
    let ctx = Arc::new(Context::new(store.clone(), store, engine));

    let health = HealthBroadcaster::new();

    // Start health server
    let health_addr = args.health_addr.clone();
    {
        let health = health.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(&health_addr, health).await {
                error!("Health server error: {}", e);
            }
        });
    }

    health.set_status(CONTROLLER_SERVICE, ServingStatus::Serving);

    controller::run(client, ctx).await;

    health.set_status(CONTROLLER_SERVICE, ServingStatus::NotServing);
    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Route one health request.
///
/// `/healthz` and `/livez` answer liveness, `/readyz` readiness of the
/// controller service, `/statusz/{service}` the current status of any named
/// service, and `/watchz/{service}` streams status changes as one line per
/// update until the client disconnects.
fn health_response(
    req: &hyper::Request<hyper::Body>,
    health: &HealthBroadcaster,
) -> hyper::Response<hyper::Body> {
    use futures::StreamExt;
    use hyper::{Body, Response, StatusCode};
    use tokio_util::sync::CancellationToken;

    let path = req.uri().path();
    match path {
        "/healthz" | "/livez" => Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("ok"))
            .unwrap(),
        "/readyz" => {
            let status = health.check(CONTROLLER_SERVICE);
            if status == Some(ServingStatus::Serving) {
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("ok"))
                    .unwrap()
            } else {
                Response::builder()
                    .status(StatusCode::SERVICE_UNAVAILABLE)
                    .body(Body::from("not serving"))
                    .unwrap()
            }
        }
        _ if path.starts_with("/statusz/") => {
            let service = &path["/statusz/".len()..];
            match health.check(service) {
                Some(status) => Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from(format!("{}\n", status)))
                    .unwrap(),
                None => Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Body::from("unknown service"))
                    .unwrap(),
            }
        }
        _ if path.starts_with("/watchz/") => {
            let service = &path["/watchz/".len()..];
            // Dropping the response body ends the subscription.
            let updates = health
                .watch_stream(service, CancellationToken::new())
                .map(|status| Ok::<_, std::convert::Infallible>(format!("{}\n", status)));
            Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(Body::wrap_stream(updates))
                .unwrap()
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found"))
            .unwrap(),
    }
}

async fn run_health_server(addr: &str, health: HealthBroadcaster) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server};

    let make_svc = make_service_fn(move |_conn| {
        let health = health.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let health = health.clone();
                async move { Ok::<_, std::convert::Infallible>(health_response(&req, &health)) }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}
