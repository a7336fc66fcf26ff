use futures::FutureExt;
use std::{future::Future, panic::AssertUnwindSafe};

pub mod account;
pub mod concurrency;
pub mod database;
pub mod job;
pub mod ledger;
pub mod money;
pub mod notify;
pub mod service;
pub mod transfer;
pub mod user;
pub mod worker;

pub use money::Money;
pub use service::Funds;

#[derive(Debug, Clone, Copy)]
pub struct QueryRange {
    pub limit: i64,
    pub offset: i64,
}

impl Default for QueryRange {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Runs the future to completion. A panic inside it is turned into `None`.
async fn swallow_panic<T>(f: impl Future<Output = T>) -> Option<T> {
    AssertUnwindSafe(f).catch_unwind().await.ok()
}
