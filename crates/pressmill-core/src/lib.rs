pub mod article;
pub mod config;
pub mod error;
pub mod generator;
pub mod io;
pub mod paths;
pub mod publish;
pub mod render;
pub mod rotator;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;

pub use error::{PressmillError, Result};
