use crate::database::Database;
use crate::events::EventHandler;
use crate::modules::monitor::database::MonitorDatabase;
use async_trait::async_trait;
use poise::serenity_prelude::{ActivityData, Context, FullEvent, OnlineStatus};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ReadyHandler {
    db: Database<MonitorDatabase>,
}

impl ReadyHandler {
    pub fn new(db: Database<MonitorDatabase>) -> Self {
        Self { db }
    }
}

pub fn presence_text(count: usize) -> String {
    match count {
        1 => "1 Minecraft server".to_string(),
        n => format!("{n} Minecraft servers"),
    }
}

#[async_trait]
impl EventHandler for ReadyHandler {
    fn name(&self) -> &str {
        "Ready"
    }

    async fn handle(
        &self,
        ctx: &Context,
        event: &FullEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let FullEvent::Ready { data_about_bot } = event {
            let count = self.db.count().await;
            info!(
                "{} has connected, monitoring {} servers",
                data_about_bot.user.name, count
            );
            ctx.set_presence(
                Some(ActivityData::watching(presence_text(count))),
                OnlineStatus::Online,
            )
        }
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn EventHandler> {
        Box::new(self.clone())
    }
}
