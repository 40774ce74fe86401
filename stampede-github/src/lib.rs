//! GitHub directory backend for stampede

mod client;
mod error;

pub use client::GitHubClient;
pub use error::{Error, Result};
