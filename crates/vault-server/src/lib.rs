pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vault_api::middleware::require_caller;
use vault_api::{AppState, AppStateInner, PageLimits, files, messages, reads, rooms, users};
use vault_db::Database;
use vault_gateway::{Fanout, GatewayConfig, Registry, handle_connection};

use crate::config::{Config, MAX_PAGE_SIZE};

/// Shared state for the HTTP and real-time surfaces over one store.
pub fn app_state(db: Arc<Database>, config: &Config) -> AppState {
    let fanout = Fanout::new(Registry::new(), Arc::clone(&db), config.fanout_timeout);
    Arc::new(AppStateInner {
        db,
        fanout,
        gateway: GatewayConfig {
            auth_timeout: config.auth_timeout,
            ..GatewayConfig::default()
        },
        pages: PageLimits {
            default: config.page_size,
            max: MAX_PAGE_SIZE,
        },
        file_dir: config.file_dir.clone(),
    })
}

pub fn build_app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/rooms", post(rooms::create_room).get(rooms::list_rooms))
        .route(
            "/rooms/{room_id}",
            get(rooms::get_room)
                .patch(rooms::update_room)
                .delete(rooms::delete_room),
        )
        .route("/rooms/{room_id}/participants", post(rooms::add_participants))
        .route("/rooms/{room_id}/leave", post(rooms::leave_room))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/rooms/{room_id}/messages/{message_id}", patch(messages::edit_message))
        .route("/rooms/{room_id}/read", post(reads::mark_read))
        .route("/messages/{message_id}", get(messages::get_message))
        .route("/unread-counts", get(reads::unread_counts))
        .route("/users/{user_id}", get(users::get_user))
        .route(
            "/files",
            post(files::upload_file).layer(DefaultBodyLimit::max(files::MAX_FILE_SIZE)),
        )
        .route("/files/{file_id}", get(files::download_file))
        .layer(middleware::from_fn_with_state(state.clone(), require_caller))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let fanout = state.fanout.clone();
    let config = state.gateway;
    ws.on_upgrade(move |socket| handle_connection(socket, fanout, config))
}
