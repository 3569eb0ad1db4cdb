mod error;
mod handlers;
mod helpers;
mod router;
mod types;

pub use router::{apply_job, handle_request};
pub use types::{AppState, Request};
