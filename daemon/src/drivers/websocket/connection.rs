use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::{SinkExt, StreamExt};
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::{atomic, Arc};
use tokio::select;
use tokio::sync::mpsc::unbounded_channel;
use uuid::Uuid;

use crate::app::AppState;
use crate::auth::JwtClaims;
use crate::config::AppConfig;
use crate::management::hub::ClientHandle;

/// Session parameters established at verification time. Main-token
/// sessions never expire; JWT sessions close at their deadline.
pub struct WebsocketContext {
    pub expire_to: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<JwtClaims> for WebsocketContext {
    fn from(claims: JwtClaims) -> Self {
        Self {
            expire_to: chrono::DateTime::from_timestamp(claims.exp as i64, 0),
        }
    }
}

pub struct WebsocketConnection {
    pub app_state: AppState,

    /// The identity this socket has on the subscription channels; its
    /// queue is drained by the socket loop.
    pub client: ClientHandle,
    pub addr: SocketAddr,
}

impl WebsocketConnection {
    fn new(app_state: AppState, client: ClientHandle, addr: SocketAddr) -> WebsocketConnection {
        WebsocketConnection {
            app_state,
            client,
            addr,
        }
    }

    /// Checks the `token` query parameter: either the configured main
    /// token, or a valid unexpired JWT sub-token.
    pub fn verify_connection(
        query: &std::collections::HashMap<String, String>,
    ) -> Result<WebsocketContext, String> {
        let token = query
            .get("token")
            .ok_or_else(|| "Missing required 'token' field: `token`".to_string())?;

        let auth = &AppConfig::get().auth;
        if auth.main_token.eq(token.trim()) {
            Ok(WebsocketContext { expire_to: None })
        } else {
            let claims =
                JwtClaims::decode(token, &auth.jwt_secret).map_err(|err| err.to_string())?;
            Ok(WebsocketContext::from(claims))
        }
    }
}

pub struct WsConnManager {
    id: AtomicUsize,
    connections: scc::HashMap<usize, Arc<WebsocketConnection>, ahash::RandomState>,
}

impl Default for WsConnManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnManager {
    pub fn new() -> Self {
        Self {
            id: AtomicUsize::new(0),
            connections: scc::HashMap::default(),
        }
    }
}

impl WsConnManager {
    fn add(&self, conn: Arc<WebsocketConnection>) -> usize {
        let id = self.id.fetch_add(1, atomic::Ordering::Relaxed);
        let _ = self.connections.insert(id, conn);
        id
    }

    pub async fn serve_connection(
        &self,
        ws: WebSocket,
        context: WebsocketContext,
        app_state: AppState,
        peer_addr: SocketAddr,
    ) -> anyhow::Result<()> {
        let (mut outgoing, mut incoming) = ws.split();

        let (push_tx, mut push_rx) = unbounded_channel();
        let client = ClientHandle::new(Uuid::new_v4(), push_tx);

        let ws_conn = Arc::new(WebsocketConnection::new(
            app_state.clone(),
            client.clone(),
            peer_addr,
        ));

        let cancel_token = app_state.stop_notify.clone();
        let expire_in = context
            .expire_to
            .map(|to| (to - chrono::Utc::now()).to_std().unwrap_or_default());

        let ws_conn_clone = ws_conn.clone();

        let connection_loop = || async move {
            let expiry = async move {
                match expire_in {
                    Some(duration) => tokio::time::sleep(duration).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(expiry);

            loop {
                select! {
                    // read
                    msg = incoming.next() => {
                        if let Some(Ok(m)) = msg {
                            ws_conn_clone.handle_received(m)?
                        }
                        else {
                            break;
                        }
                    }

                    // event fan-out addressed to this client
                    msg = push_rx.recv() => {
                        if let Some(m) = msg {
                            let text = serde_json::to_string(&m)?;
                            outgoing.send(Message::Text(Utf8Bytes::from(text))).await?;
                        }
                        else {
                            break;
                        }
                    }

                    // sub-token deadline
                    _ = &mut expiry => {
                        outgoing.send(Message::Close(Some(CloseFrame{
                            code: close_code::POLICY,
                            reason: "session expired".into()
                        }))).await?;
                        outgoing.close().await?;
                        info!("websocket session from {} expired", peer_addr);
                        break;
                    }

                    // cancel
                    _ = cancel_token.notified() => {
                        outgoing.send(Message::Close(Some(CloseFrame{
                            code: close_code::NORMAL,
                            reason: "daemon closed".into()
                        }))).await?;
                        outgoing.close().await?;
                        info!("websocket connection from {} closed", peer_addr);
                        break;
                    }
                }
            }
            anyhow::Ok(())
        };
        let id = self.add(ws_conn);
        let rv = tokio::spawn(connection_loop()).await?;
        self.connections.remove(&id);

        // drop every subscription this client held
        app_state.registry.drop_client(client.id());
        debug!("client {} detached from all channels", client.id());
        rv
    }
}
