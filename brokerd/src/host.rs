//! Host-side mount point for the broker protocol engine.

use async_trait::async_trait;

use brokerd_core::engine::ServiceEngine;
use brokerd_core::error::BrokerResult;
use brokerd_core::settings::BrokerSettings;

/// Carries the validated settings across restart cycles and logs lifecycle
/// transitions. The protocol engine proper is an external component that
/// mounts here.
// TODO: hand the settings to the RDMnet protocol stack once it is wired in.
#[derive(Default)]
pub struct BrokerEngineHost {
    settings: BrokerSettings,
    running: bool,
}

#[async_trait]
impl ServiceEngine for BrokerEngineHost {
    async fn start(&mut self, settings: BrokerSettings) -> BrokerResult<()> {
        tracing::info!(
            scope = %settings.scope,
            port = settings.listen_port,
            max_connections = settings.max_connections,
            "Broker engine starting"
        );
        self.settings = settings;
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) {
        if self.running {
            tracing::info!("Broker engine stopped");
            self.running = false;
        }
    }

    async fn tick(&mut self) {}

    fn current_settings(&self) -> BrokerSettings {
        self.settings.clone()
    }
}
