//! amazon-ppc: Amazon Advertising API core
//!
//! Credential and session management plus a bulk-operation gateway for the
//! Amazon Advertising (PPC) API. Handles Login with Amazon token refresh,
//! account scoping, per-partition rate limiting, retries, and splitting large
//! mutations into sub-batches whose multi-status answers are merged back into
//! one result per item.
//!
//! # Quick Start
//!
//! ```no_run
//! use amazon_ppc::prelude::*;
//!
//! # async fn example() -> amazon_ppc::error::Result<()> {
//! let client = AdsClient::connect(PpcConfig::from_env()?)?;
//! let enabled = client
//!     .campaigns()
//!     .query(QueryFilter::new().states(["ENABLED"]))
//!     .await?;
//! println!("{} enabled campaigns", enabled.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod prelude;
pub mod util;

pub use client::{AdsClient, ResourceClient};
