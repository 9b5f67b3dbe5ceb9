pub mod error;
pub mod files;
pub mod messages;
pub mod middleware;
pub mod reads;
pub mod rooms;
pub mod state;
pub mod users;

pub use error::ApiError;
pub use state::{AppState, AppStateInner, PageLimits};
