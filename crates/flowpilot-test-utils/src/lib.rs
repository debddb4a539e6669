pub mod fixtures;
pub mod mock_service;

pub use mock_service::{Call, MockService};
