pub mod boundary;
pub mod event;
pub mod parser;

pub use event::{Level, LogEvent};
pub use parser::{LaunchLogParser, LineParser};
