pub mod config;
pub mod error;
pub mod event;
pub mod node;
pub mod protocol;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{FlowError, Result};
pub use event::EventBus;
pub use node::{Node, NodeConfig, NodeKind, Position};
pub use types::*;
