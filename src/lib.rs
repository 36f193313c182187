// src/lib.rs

pub mod config;
pub mod error;
pub mod supervisor;
pub mod sys;

pub use config::AgentConfig;
pub use error::{AgentError, BackendError};
pub use supervisor::{Phase, RunReport, Supervisor, TickReport};
