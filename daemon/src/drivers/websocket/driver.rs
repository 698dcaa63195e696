use axum::extract::Query;
use axum::http::header;
use axum::{
    body::Body,
    extract::{
        multipart::Multipart,
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{Method, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use log::{debug, error, info};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::auth::JwtClaims;
use crate::drivers::websocket::{WebsocketConnection, WebsocketContext};
use crate::drivers::Driver;
use crate::{app::AppState, config::AppConfig, drivers::Drivers};

pub struct WsDriver {
    app_state: AppState,
}

#[async_trait::async_trait]
impl Driver for WsDriver {
    async fn run(&self) {
        let listen = &AppConfig::get().drivers.websocket.listen;
        let addr = SocketAddr::new(listen.host, listen.port);

        let app = Router::new()
            .route("/api/v1", get(ws_handler))
            .route("/subtoken", post(subtoken_handler))
            .route("/info", get(info_handler))
            .with_state(self.app_state.clone())
            .layer(
                CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods([Method::GET, Method::POST]),
            )
            .into_make_service_with_connect_info::<SocketAddr>();

        let listener = TcpListener::bind(addr).await.expect("Failed to bind");
        info!("WebSocket server listening on {}", addr);

        let stop_token = self.app_state.stop_notify.clone();
        let state = self.app_state.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                stop_token.notified().await;
                info!("Shutdown signal received, closing connections...");

                let mut ws_handlers = state.ws_connections.lock().await;
                for handler in ws_handlers.drain(..) {
                    if let Err(err) = handler.await {
                        error!("Error handling websocket connection: {}", err);
                    }
                }
            })
            .await
            .unwrap();
    }

    fn driver_type(&self) -> Drivers {
        Drivers::Websocket
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("WebSocket connection received from {:?}", addr);
    match WebsocketConnection::verify_connection(&params) {
        Ok(context) => {
            ws.on_upgrade(move |socket| handle_ws_connection(socket, context, state, addr))
        }
        Err(reason) => Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(reason.into())
            .unwrap(),
    }
}

async fn handle_ws_connection(
    socket: WebSocket,
    context: WebsocketContext,
    state: AppState,
    addr: SocketAddr,
) {
    let state_clone = state.clone();

    let join_handle = tokio::spawn(async move {
        let state_clone = state.clone();
        match state
            .ws_conn_manager
            .serve_connection(socket, context, state_clone, addr)
            .await
        {
            Ok(_) => debug!("WebSocket connection closed: {}", addr),
            Err(e) => error!("WebSocket error: {}: {}", addr, e),
        }
    });

    state_clone.track_ws_connection(join_handle).await;
}

#[derive(Debug, Error)]
enum HandlerError {
    #[error("Invalid field: {0}")]
    FieldError(String),
    #[error("Invalid expiration time")]
    InvalidExpires,
    #[error("Unauthorized")]
    Unauthorized,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response<Body> {
        let status = match self {
            HandlerError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        };

        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(self.to_string()))
            .unwrap()
    }
}

async fn subtoken_handler(mut multipart: Multipart) -> Result<Response<Body>, HandlerError> {
    let mut token = None;
    let mut expires = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HandlerError::FieldError(e.to_string()))?
    {
        let field_name = field
            .name()
            .ok_or(HandlerError::FieldError("Missing field name".into()))?;

        match field_name {
            "token" => {
                token =
                    Some(field.text().await.map_err(|e| {
                        HandlerError::FieldError(format!("Token field error: {}", e))
                    })?);
            }
            "expires" => {
                let expires_str = field
                    .text()
                    .await
                    .map_err(|e| HandlerError::FieldError(format!("Expires field error: {}", e)))?;

                expires = if !expires_str.is_empty() {
                    Some(
                        expires_str
                            .parse::<u64>()
                            .map_err(|_| HandlerError::InvalidExpires)?,
                    )
                } else {
                    None
                };
            }
            _ => {
                return Err(HandlerError::FieldError(format!(
                    "Unknown field: {}",
                    field_name
                )))
            }
        }
    }

    let token = token.ok_or(HandlerError::FieldError("Missing token".into()))?;

    if !AppConfig::get().auth.main_token.eq(&token) {
        return Err(HandlerError::Unauthorized);
    }

    let expires_seconds = expires.unwrap_or(30);
    let claims = JwtClaims::new(expires_seconds);
    let jwt = claims.encode(&AppConfig::get().auth.jwt_secret);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(jwt))
        .unwrap())
}

async fn info_handler() -> impl IntoResponse {
    let response_body = json!({
        "name": "Spigot Fleet Daemon",
        "version": crate::app::VERSION,
        "api_version": "v1"
    })
    .to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(response_body))
        .unwrap()
}

impl WsDriver {
    pub fn new(app_state: AppState) -> Self {
        Self { app_state }
    }
}
