// Webhook reliability engine
//
// Handles:
// - Durable records of inbound payment webhooks
// - Fixed-schedule retry with per-record attempt limits
// - Lease-guarded processing attempts with pluggable handlers
// - Periodic sweeps of due retries
// - Query, replay and retention cleanup

pub mod clock;
pub mod engine;
pub mod handler;
pub mod processor;
pub mod record;
pub mod retry;
pub mod state;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineSettings, WebhookEngine};
pub use handler::{DeliveryHandler, FnHandler, HandlerResponse, HttpForwardHandler};
pub use processor::{AttemptOutcome, DeliveryProcessor, ProcessorSettings};
pub use record::{
    Correlation, DeliveryAttempt, LastResult, NewRecord, RecordStatus, RequestMeta,
    WebhookRecord, WebhookSource,
};
pub use retry::RetryPolicy;
pub use state::{AttemptMode, Ineligible};
pub use store::{
    FileRecordStore, ListQuery, MemoryRecordStore, RecordPage, RecordStats, RecordStore,
};
pub use sweeper::{RetrySweeper, SweepSettings};
