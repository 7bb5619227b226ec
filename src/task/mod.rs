//! Task data model and parsing.
//!
//! A task is one file on disk: either a JSON object (producer API) or a
//! Markdown file with YAML front matter (human-authored backlog). Both forms
//! parse into the same [`Task`] record.

pub mod parser;
pub mod record;
pub mod timeout;

pub use parser::{parse_task_file, parse_task_json, parse_task_markdown};
pub use record::{Response, ResponseError, ResponseStatus, Task, TaskMode, MAX_DELEGATION_HOPS};
pub use timeout::parse_timeout;
