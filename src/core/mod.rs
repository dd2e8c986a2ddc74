pub mod bridge;
pub mod error;
pub mod events;
pub mod progress;
pub mod relay;
pub mod worker;
