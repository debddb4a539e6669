pub mod model;
pub mod sanitizer;
pub mod validator;

pub use model::{check_labels, WorkflowGraph};
pub use sanitizer::sanitize;
pub use validator::{propose_connection, would_create_cycle, Decision, Question, QuestionKind, SourceRef};
