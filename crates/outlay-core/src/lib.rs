//! Core domain for Outlay user provisioning.
//!
//! Holds the user and retry-queue models, PostgreSQL repositories, the
//! clock abstraction and the provisioning logic shared by the HTTP service
//! and its background retry worker.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod provisioning;
pub mod storage;
pub mod time;

pub use error::{CoreError, OutlayError, Result};
pub use models::{FailureId, FailureStatus, NewUser, ProvisioningFailure, User, UserId};
pub use provisioning::{
    MemoryProvisioningStore, PostgresProvisioningStore, Provisioner, ProvisioningOutcome,
    ProvisioningStore, RetryDecision, RetryPolicy, RetryWorker, WorkerConfig,
};
pub use time::{Clock, RealClock, TestClock};
