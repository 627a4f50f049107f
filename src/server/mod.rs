mod handlers;

use std::net::{SocketAddr, TcpListener};

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{info, Level};

use crate::signaling::Signaling;

pub(crate) mod state {
  use crate::signaling::Signaling;

  /// Shared by every handler.
  #[derive(Clone)]
  pub(crate) struct ServerState {
    pub signaling: Signaling,
  }
}

use self::state::ServerState;

pub struct Server {
  port: u16,
  allowed_origin: Option<HeaderValue>,
  signaling: Signaling,
}

impl Server {
  pub fn new(port: u16, signaling: Signaling) -> Self {
    Self { port, allowed_origin: None, signaling }
  }

  /// Restricts browsers to one origin instead of any.
  pub fn with_allowed_origin(mut self, origin: &str) -> Result<Self> {
    let origin = origin.parse().with_context(|| format!("invalid origin {origin}"))?;
    self.allowed_origin = Some(origin);
    Ok(self)
  }

  pub async fn listen(self) -> Result<()> {
    info!("starting server: {}", self.port);
    let addr = SocketAddr::new([0, 0, 0, 0].into(), self.port);
    let listener = TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
    self.serve(listener).await
  }

  /// Serves on an already bound listener.
  pub async fn serve(self, listener: TcpListener) -> Result<()> {
    listener.set_nonblocking(true)?;
    let app = self.router();
    axum::Server::from_tcp(listener)?
      .serve(app.into_make_service_with_connect_info::<SocketAddr>())
      .await?;

    Ok(())
  }

  fn router(self) -> Router {
    let state = ServerState { signaling: self.signaling };
    Router::new()
      .route("/", get(handlers::signal))
      .route("/info", get(handlers::info))
      .layer(cors(self.allowed_origin))
      .layer(trace())
      .with_state(state)
  }
}

fn cors(allowed_origin: Option<HeaderValue>) -> CorsLayer {
  match allowed_origin {
    Some(origin) => CorsLayer::new().allow_methods([Method::GET]).allow_origin([origin]),
    None => CorsLayer::new().allow_methods([Method::GET]).allow_origin(Any),
  }
}

fn trace() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
  TraceLayer::new_for_http()
    .on_response(DefaultOnResponse::new().level(Level::INFO).latency_unit(LatencyUnit::Micros))
}
