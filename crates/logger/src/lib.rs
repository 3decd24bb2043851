//! Process-wide tracing setup shared by the workspace binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, init_tracing_with};
