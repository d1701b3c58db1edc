pub mod config;
pub mod error;
pub mod health;
pub mod intake;
pub mod locks;
pub mod model;
pub mod orchestrator;
pub mod routes;
pub mod startup;
pub mod state;

pub use crate::config::{Settings, get_configuration};
pub use error::{ApiError, PipelineError, ValidationError};
pub use routes::router;
pub use state::{AppState, ModelState};
