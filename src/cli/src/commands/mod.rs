pub mod config;
pub mod health;
pub mod job;
pub mod queue;
pub mod submit;
pub mod workers;
