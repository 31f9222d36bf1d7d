pub mod controller;
pub mod formatter;
pub mod resolver;
pub mod service;
pub mod session;

pub use controller::AppController;
pub use formatter::{format_tick_timestamp, format_timestamp, SegmentFormatter, UNDETERMINED_LANGUAGE};
pub use resolver::{ParameterResolver, Resolved};
pub use service::TranscriptionService;
pub use session::{InvocationMode, Session, TranscribeOptions};
