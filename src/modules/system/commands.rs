use crate::{Context, Error};
use tracing::{error, info};

/// Stop polling, save and disconnect. Owners only.
#[poise::command(prefix_command, owners_only, hide_in_help, category = "System")]
pub async fn shutdown(ctx: Context<'_>) -> Result<(), Error> {
    info!("Shutdown requested by {}", ctx.author().tag());
    ctx.say("Shutting down").await?;

    let data = ctx.data();
    data.task_manager.shutdown().await;
    if let Err(e) = data.dbs.monitor.flush().await {
        error!("Failed to save servers before shutdown: {}", e);
    }

    ctx.framework().shard_manager().shutdown_all().await;
    Ok(())
}
