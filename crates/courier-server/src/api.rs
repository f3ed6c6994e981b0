//! HTTP surface: health and instance info, the WebSocket upgrade, user
//! registration, and paged reads (message history, call history) that are
//! cheaper over REST than over the socket.

use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use courier_shared::Message;
use courier_store::{Call, StoreError, User};

use crate::error::ServerError;
use crate::gateway::ws_handler;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route("/users", post(create_user))
        .route("/chats", post(open_direct_chat))
        .route("/chats/:chat_id/messages", get(message_history))
        .route("/calls", get(call_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct CreateUserRequest {
    #[serde(default)]
    id: Option<Uuid>,
}

#[derive(Serialize)]
struct CreateUserResponse {
    id: Uuid,
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ServerError> {
    let user = User::new(req.id.unwrap_or_else(Uuid::new_v4));
    {
        let db = state.db.lock().await;
        db.create_user(&user)?;
    }
    info!(user_id = %user.id, "user registered");
    Ok(Json(CreateUserResponse { id: user.id }))
}

#[derive(Deserialize)]
struct OpenChatRequest {
    user_id: Uuid,
    peer_id: Uuid,
}

#[derive(Serialize)]
struct OpenChatResponse {
    chat_id: Uuid,
    created: bool,
}

/// Find-or-create a one-to-one conversation. Passing the caller's own id
/// as the peer opens their self-chat.
async fn open_direct_chat(
    State(state): State<AppState>,
    Json(req): Json<OpenChatRequest>,
) -> Result<Json<OpenChatResponse>, ServerError> {
    let (chat_id, created) = {
        let db = state.db.lock().await;
        for id in [req.user_id, req.peer_id] {
            db.get_user(id).map_err(|e| match e {
                StoreError::NotFound => ServerError::UserNotFound,
                other => other.into(),
            })?;
        }

        match db.find_direct_chat(req.user_id, req.peer_id)? {
            Some(existing) => (existing, false),
            None => {
                let chat = courier_store::Chat::direct();
                let members = if req.user_id == req.peer_id {
                    vec![req.user_id]
                } else {
                    vec![req.user_id, req.peer_id]
                };
                db.create_chat(&chat, &members, &[])?;
                (chat.id, true)
            }
        }
    };

    if created {
        use crate::presence::RoomId;
        state
            .presence
            .join_user(req.user_id, RoomId::Chat(chat_id))
            .await;
        state
            .presence
            .join_user(req.peer_id, RoomId::Chat(chat_id))
            .await;
        info!(%chat_id, "direct chat created");
    }
    Ok(Json(OpenChatResponse { chat_id, created }))
}

#[derive(Deserialize)]
struct HistoryParams {
    user_id: Uuid,
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// Paged message history, oldest first, filtered by the caller's
/// visibility (soft deletes, unreleased, retention).
async fn message_history(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let db = state.db.lock().await;
    if !db.is_participant(chat_id, params.user_id)? {
        return Err(ServerError::NotParticipant);
    }
    let messages = db.messages_for_chat(chat_id, params.user_id, params.limit, params.offset)?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
struct CallHistoryParams {
    user_id: Uuid,
    #[serde(default = "default_limit")]
    limit: u32,
}

async fn call_history(
    State(state): State<AppState>,
    Query(params): Query<CallHistoryParams>,
) -> Result<Json<Vec<Call>>, ServerError> {
    let db = state.db.lock().await;
    db.get_user(params.user_id).map_err(|e| match e {
        StoreError::NotFound => ServerError::UserNotFound,
        other => other.into(),
    })?;
    let calls = db.calls_for_user(params.user_id, params.limit)?;
    Ok(Json(calls))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
