pub mod admin;
pub mod auth;
pub mod models;
pub mod responses;
pub mod router;
pub mod state;
pub mod templates;

pub use auth::SessionMember;
pub use models::{LocalizedText, ReviewStatus};
pub use responses::ApiError;
pub use state::AppState;
pub use templates::escape_html;
