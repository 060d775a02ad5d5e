//! The hosted broker protocol engine, seen from the lifecycle coordinator.

use async_trait::async_trait;

use crate::error::BrokerResult;
use crate::settings::BrokerSettings;

/// The opaque protocol engine the coordinator starts, stops and ticks.
///
/// Implementations must tolerate `start` after a failed `start` (the
/// coordinator retries on the next restart cycle) and `stop` when not
/// running.
#[async_trait]
pub trait ServiceEngine: Send {
    /// Bring the engine up with a fully-resolved settings record.
    async fn start(&mut self, settings: BrokerSettings) -> BrokerResult<()>;

    /// Tear the engine down. Must be idempotent.
    async fn stop(&mut self);

    /// Give the engine a slice of the poll loop to do periodic work.
    async fn tick(&mut self);

    /// The settings the engine is currently running with.
    fn current_settings(&self) -> BrokerSettings;
}
