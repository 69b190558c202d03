use crate::router::{ToolRouter, TOOLS};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use relay_core::{RelayError, RelayResult, ToolCall, ToolResult};
use relay_orchestrator::{ObserverRequest, Orchestrator, Subscription};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub router: ToolRouter,
}

/// The observer and tool-call gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the HTTP/WebSocket router around an orchestrator.
    pub fn build(orchestrator: Arc<Orchestrator>) -> Router {
        let state = Arc::new(AppState {
            router: ToolRouter::new(orchestrator.clone()),
            orchestrator,
        });

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/tools", get(list_tools_handler).post(tool_call_handler))
            .with_state(state)
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn serve(
        addr: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> RelayResult<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Gateway listening");
        axum::serve(listener, Self::build(orchestrator))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| RelayError::Gateway(e.to_string()))
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "relay",
        "observers": state.orchestrator.events().subscriber_count().await,
    }))
}

async fn list_tools_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "tools": TOOLS }))
}

async fn tool_call_handler(
    State(state): State<Arc<AppState>>,
    Json(call): Json<ToolCall>,
) -> Json<ToolResult> {
    Json(state.router.dispatch(call).await)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let Subscription {
        id: observer_id,
        mut receiver,
    } = state.orchestrator.subscribe().await;

    info!(observer_id = %observer_id, "Observer connected");

    let initial = state.orchestrator.initial_state().await;

    // Task: forward events (and replies) from the subscription to the WebSocket
    let mut send_task = tokio::spawn(async move {
        match initial.and_then(|event| event.to_json().map_err(RelayError::from)) {
            Ok(json) => {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(observer_id = %observer_id, error = %e, "Failed to build initial state"),
        }
        while let Some(event) = receiver.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Task: answer observer requests through the same subscription
    let orchestrator = state.orchestrator.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let request: ObserverRequest = match serde_json::from_str(text.as_str()) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(observer_id = %observer_id, error = %e, "Ignoring observer message");
                            continue;
                        }
                    };
                    match orchestrator.answer(request).await {
                        Ok(reply) => {
                            if !orchestrator.events().send_to(observer_id, reply).await {
                                break;
                            }
                        }
                        Err(e) => warn!(observer_id = %observer_id, error = %e, "Failed to answer observer"),
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.orchestrator.unsubscribe(observer_id).await;
    info!(observer_id = %observer_id, "Observer disconnected");
}
