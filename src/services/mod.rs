pub mod agent;
pub mod orchestrator;
pub mod settings;
pub mod tools;
