// tasklane-api: Async Rust client for the Tasklane service (REST + realtime feed)

pub mod client;
pub mod error;
pub mod model;
pub mod realtime;
pub mod transport;

pub use client::HttpTransport;
pub use error::Error;
pub use model::{Project, ProjectList, Task, TaskList, TaskQuery, TaskStatus, TaskUpdate};
pub use transport::{TlsMode, Transport, TransportConfig};
