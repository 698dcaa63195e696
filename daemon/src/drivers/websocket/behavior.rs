use axum::extract::ws::{CloseFrame, Message};
use log::{debug, info};

use fleet_protocol::{ApiRequest, PushMessage};

use crate::app::AppState;
use crate::drivers::websocket::WebsocketConnection;
use crate::error::FleetError;
use crate::management::hub::ClientHandle;

impl WebsocketConnection {
    pub fn handle_received(&self, data: Message) -> anyhow::Result<()> {
        match data {
            Message::Text(text) => {
                debug!("received text: {}", text);

                match serde_json::from_str::<ApiRequest>(&text) {
                    Ok(request) => {
                        let state = self.app_state.clone();
                        let client = self.client.clone();
                        tokio::spawn(async move {
                            handle_request(state, client, request).await;
                        });
                    }
                    Err(err) => {
                        self.client.send(PushMessage::Error {
                            kind: "bad-request".to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
            Message::Close(close) => {
                self.handle_closing(close.as_ref());
            }
            _ => {}
        }
        Ok(())
    }

    pub fn handle_closing(&self, msg: Option<&CloseFrame>) {
        info!(
            "websocket close from client({}), with reason: {}",
            self.addr,
            msg.map(|f| f.reason.clone()).unwrap_or_default()
        );
    }
}

/// Dispatches one inbound command against the registry; failures are
/// pushed back as ERROR messages carrying the stable kind string.
pub async fn handle_request(state: AppState, client: ClientHandle, request: ApiRequest) {
    let registry = &state.registry;
    let result: Result<(), FleetError> = match request {
        ApiRequest::RequestServersList => {
            client.send(PushMessage::ServersList(registry.servers_list()));
            Ok(())
        }

        ApiRequest::SubscribeServersDetail => {
            registry.subscribe_fleet(client.clone());
            Ok(())
        }
        ApiRequest::UnsubscribeServersDetail => {
            registry.unsubscribe_fleet(client.id());
            Ok(())
        }
        ApiRequest::SubscribeServerDetail(slug) => {
            registry.subscribe_detail(&slug, client.clone())
        }
        ApiRequest::UnsubscribeServerDetail(slug) => {
            registry.unsubscribe_detail(&slug, client.id())
        }
        ApiRequest::SubscribeServerConsole(slug) => {
            registry.subscribe_console(&slug, client.clone())
        }
        ApiRequest::UnsubscribeServerConsole(slug) => {
            registry.unsubscribe_console(&slug, client.id())
        }

        ApiRequest::StartServer(slug) => registry.start_server(&slug).await,
        ApiRequest::StopServer(slug) => registry.stop_server(&slug).await,
        ApiRequest::RestartServer(slug) => registry.restart_server(&slug).await,
        ApiRequest::KillServer(slug) => registry.kill_server(&slug),
        ApiRequest::ServerCommand { server, command } => {
            registry.send_command(&server, &command).await
        }

        ApiRequest::AddServer {
            slug,
            name,
            template,
            jarfile,
        } => registry.add_server(&slug, &name, &template, &jarfile).await,
        ApiRequest::RemoveServer(slug) => registry.remove_server(&slug).await,
        ApiRequest::ActivateServer(slug) => registry.set_server_active(&slug, true).await,
        ApiRequest::DeactivateServer(slug) => registry.set_server_active(&slug, false).await,
        ApiRequest::BackupServer(slug) => registry.backup_server(&slug).await,
        ApiRequest::ReloadNetwork => registry.reload().await,
    };

    if let Err(err) = result {
        client.send(PushMessage::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }
}
