#![allow(async_fn_in_trait)]
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod expr;
pub mod ledger;
pub mod monitor;
pub mod query;
pub mod satellite;
pub mod scale;
pub mod submission;
pub mod window;

pub use error::{ExportError, Result};
