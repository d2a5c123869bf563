// backupengine/src/delivery/mod.rs
pub(crate) mod orchestrator;
pub(crate) mod retry;

pub use orchestrator::{describe_outcomes, DeliveryOrchestrator};
pub use retry::{BackoffGrowth, RetryPolicy};
