pub mod log_helpers;
pub mod sse;
