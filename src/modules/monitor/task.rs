use super::engine::ReconciliationEngine;
use super::notify::{DiscordSink, NotificationSink};
use crate::tasks::Task;
use async_trait::async_trait;
use poise::serenity_prelude::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct MonitorTask {
    engine: Arc<ReconciliationEngine>,
}

impl MonitorTask {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self { engine }
    }

    /// Runs one tick and hands every notification to `sink`. Returns how many were
    /// delivered; a failed delivery is logged and does not stop the rest.
    pub async fn run(&self, sink: &dyn NotificationSink) -> usize {
        let start = Instant::now();
        let notifications = self.engine.tick().await;
        debug!(
            "Tick produced {} notifications in {:?}",
            notifications.len(),
            start.elapsed()
        );

        let mut delivered = 0;
        for (channel_id, notification) in &notifications {
            match sink.send(*channel_id, notification).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("Failed to notify channel {}: {}", channel_id, e),
            }
        }

        if !notifications.is_empty() {
            info!(
                "Delivered {}/{} notifications in {:?}",
                delivered,
                notifications.len(),
                start.elapsed()
            );
        }
        delivered
    }
}

#[async_trait]
impl Task for MonitorTask {
    fn name(&self) -> &str {
        "ServerMonitor"
    }

    fn schedule(&self) -> Option<Duration> {
        Some(self.engine.interval())
    }

    async fn execute(
        &mut self,
        ctx: &Context,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sink = DiscordSink::new(ctx.http.clone());
        self.run(&sink).await;
        Ok(())
    }
}
