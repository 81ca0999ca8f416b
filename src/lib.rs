//! Hookwarden Library
//!
//! This library provides a webhook delivery reliability engine: durable
//! records of inbound payment-provider webhooks, fixed-schedule retries,
//! periodic sweeps of due records, and operator query and replay.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod webhooks;

pub use error::{Result, WebhookError};
pub use webhooks::{
    DeliveryHandler, EngineSettings, HandlerResponse, NewRecord, RecordStatus, WebhookEngine,
    WebhookRecord, WebhookSource,
};
