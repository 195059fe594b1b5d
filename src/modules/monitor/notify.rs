use super::render::Notification;
use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, CreateMessage, Http};
use std::sync::Arc;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        channel_id: u64,
        notification: &Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Clone)]
pub struct DiscordSink {
    http: Arc<Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationSink for DiscordSink {
    async fn send(
        &self,
        channel_id: u64,
        notification: &Notification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut message = CreateMessage::new().embed(notification.embed());
        if let Some(icon) = notification.attachment() {
            message = message.add_file(icon);
        }
        ChannelId::new(channel_id)
            .send_message(&self.http, message)
            .await?;
        Ok(())
    }
}
