//! HTTP request handlers.

mod generate;
mod health;
mod models;

pub use generate::generate;
pub use health::{livez, readyz};
pub use models::list_models;
