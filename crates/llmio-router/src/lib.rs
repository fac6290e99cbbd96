//! HTTP edge: dialect routers for the LLM surface and the admin CRUD API.

mod admin;
mod llm;
mod models;
mod state;

pub use admin::admin_router;
pub use llm::llm_router;
pub use state::AppState;
