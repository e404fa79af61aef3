mod dto;
pub mod handlers;
pub mod reconcile;
mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::contacts_routes()
}
