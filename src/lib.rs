#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(elided_lifetimes_in_paths, unreachable_pub)]
#![warn(
    missing_docs,
    clippy::doc_link_with_quotes,
    clippy::doc_markdown,
    clippy::missing_errors_doc
)]

mod config;
pub mod error;
mod guard;
mod hooks;
mod item;
mod manager;
mod metrics;
mod pool;
mod state;


pub use self::{
    config::{CreateErrorPolicy, PoolConfig, PoolConfigBuilder},
    error::{ConfigError, Error, RunError},
    guard::{Pooled, ReleaseState},
    hooks::Phase,
    item::{ItemId, PoolId, PoolItem},
    manager::Manager,
    metrics::PoolStatus,
    pool::{Pool, PoolBuilder, RunOptions},
};

/// Re-exported for use in [`Pool::run`] callbacks.
pub use futures::future::BoxFuture;
