pub mod editor;
pub mod health;
pub mod orchestrator;
pub mod poller;
pub mod reveal;
pub mod session;
pub mod state;
pub mod task;
pub mod timers;

pub use editor::Editor;
pub use health::HealthMonitor;
pub use orchestrator::{Orchestrator, RunOutcome};
pub use poller::StatusPoller;
pub use reveal::{RevealHandle, RevealItem, RevealTiming};
pub use session::Session;
pub use state::{EditorState, SharedState};
pub use task::BackgroundTask;
pub use timers::TimerRegistry;
