use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;

use crate::chat;
use crate::config::Config;
use crate::error::ChatError;
use crate::registry::RoomRegistry;
use crate::store::Store;
use crate::users;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub registry: Arc<RoomRegistry>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Store::open(config.data_dir.join("chatmind.db"))?;
        Ok(Self {
            store,
            registry: Arc::new(RoomRegistry::new()),
            config,
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/users/search", get(search_users))
        .route("/users/:user_id", get(get_user).patch(update_user))
        .route("/chats/direct", post(create_direct_chat))
        .route("/chats/group", post(create_group_chat))
        .route("/chats/:user_id", get(list_user_chats))
        .route("/messages", post(send_message))
        .route("/messages/:room_id", get(list_messages))
        .route("/ws/rooms/:room_id", get(ws::room_ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    Json(json!({"message": "chatmind api running"}))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct SignupReq {
    name: String,
    email: String,
    password: String,
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupReq>,
) -> Result<impl IntoResponse, ChatError> {
    let user_id = users::signup(&state.store, &req.name, &req.email, &req.password)?;
    Ok((StatusCode::CREATED, Json(json!({"user_id": user_id}))))
}

#[derive(Deserialize)]
struct LoginReq {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> Result<impl IntoResponse, ChatError> {
    let (token, user) = users::login(&state.store, &req.email, &req.password)?;
    Ok(Json(json!({"token": token, "user": user})))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    20
}

async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let found = users::search_users(&state.store, &query.q, query.limit)?;
    Ok(Json(json!({"users": found})))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    Ok(Json(users::get_user(&state.store, &user_id)?))
}

#[derive(Deserialize)]
struct UpdateProfileReq {
    name: Option<String>,
    avatar_url: Option<String>,
    bio: Option<String>,
}

async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<UpdateProfileReq>,
) -> Result<impl IntoResponse, ChatError> {
    let mut patch = Map::new();
    if let Some(name) = req.name {
        patch.insert("name".into(), Value::String(name));
    }
    if let Some(avatar_url) = req.avatar_url {
        patch.insert("avatar_url".into(), Value::String(avatar_url));
    }
    if let Some(bio) = req.bio {
        patch.insert("bio".into(), Value::String(bio));
    }
    let updated = users::update_profile(&state.store, &user_id, patch)?;
    Ok(Json(json!({"updated": updated})))
}

#[derive(Deserialize)]
struct CreateDirectChatReq {
    user_id: String,
    other_user_id: String,
}

async fn create_direct_chat(
    State(state): State<AppState>,
    Json(req): Json<CreateDirectChatReq>,
) -> Result<impl IntoResponse, ChatError> {
    let room_id = chat::create_direct_room(&state.store, &req.user_id, &req.other_user_id)?;
    Ok((StatusCode::CREATED, Json(json!({"room_id": room_id}))))
}

#[derive(Deserialize)]
struct CreateGroupChatReq {
    name: String,
    member_ids: Vec<String>,
    #[serde(default)]
    admin_ids: Vec<String>,
}

async fn create_group_chat(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupChatReq>,
) -> Result<impl IntoResponse, ChatError> {
    let room_id =
        chat::create_group_room(&state.store, &req.name, &req.member_ids, &req.admin_ids)?;
    Ok((StatusCode::CREATED, Json(json!({"room_id": room_id}))))
}

async fn list_user_chats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ChatError> {
    let rooms = chat::list_rooms_for_user(&state.store, &user_id)?;
    Ok(Json(json!({"rooms": rooms})))
}

#[derive(Deserialize)]
struct SendMessageReq {
    room_id: String,
    sender_id: String,
    content: String,
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageReq>,
) -> Result<impl IntoResponse, ChatError> {
    let message_id = chat::send_message(
        &state.store,
        &state.registry,
        &req.room_id,
        &req.sender_id,
        &req.content,
    )?;
    Ok((StatusCode::CREATED, Json(json!({"message_id": message_id}))))
}

#[derive(Deserialize)]
struct ListMessagesQuery {
    #[serde(default = "default_message_limit")]
    limit: usize,
}

fn default_message_limit() -> usize {
    50
}

async fn list_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse, ChatError> {
    let messages = chat::list_messages(&state.store, &room_id, query.limit)?;
    Ok(Json(json!({"messages": messages})))
}

/// Run the HTTP server bound to the configured address.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config)?;
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
