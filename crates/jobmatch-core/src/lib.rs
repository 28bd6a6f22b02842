pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::MatchConfig;
pub use error::{MatchError, Result};
pub use events::EntityEvent;
pub use types::*;
