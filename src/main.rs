use config::Config;
use databases::Databases;
use modules::{
    monitor::{
        commands::usage_for,
        engine::ReconciliationEngine,
        query::MinecraftQuery,
        task::MonitorTask,
    },
    system::events::ReadyHandler,
};
use poise::serenity_prelude::{self as serenity, CreateAllowedMentions};
use std::sync::Arc;
use tasks::TaskManager;
use tracing::{error, info, trace, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod database;
mod databases;
mod events;
mod modules;
mod tasks;

use crate::events::EventManager;

#[derive(Clone)]
pub struct Data {
    pub dbs: Arc<Databases>,
    pub engine: Arc<ReconciliationEngine>,
    pub task_manager: Arc<TaskManager>,
    pub event_manager: Arc<EventManager>,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data").finish_non_exhaustive()
    }
}

impl Data {
    pub async fn init_tasks(&self, ctx: &serenity::Context) {
        let monitor_task = MonitorTask::new(self.engine.clone());
        self.task_manager.add_task(monitor_task).await;

        self.task_manager.start_tasks(ctx.clone()).await;
    }
}

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

fn channel_label(ctx: Context<'_>) -> String {
    ctx.guild_id().map_or_else(
        || format!("DM {}", ctx.channel_id()),
        |guild| format!("{} in {}", ctx.channel_id(), guild),
    )
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    info!("starting minewatch");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    // Opened before connecting so an unusable data path never reaches the gateway.
    let dbs = match Databases::open(&config.data_path).await {
        Ok(dbs) => Arc::new(dbs),
        Err(e) => {
            error!("Failed to open database {}: {}", config.data_path, e);
            return;
        }
    };
    let reset = dbs
        .monitor
        .reset_stale_baselines(config.stale_baseline, chrono::Utc::now())
        .await;
    info!(
        "Loaded {} servers ({} with stale baselines)",
        dbs.monitor.count().await,
        reset
    );

    let monitor_db = dbs.monitor.clone();
    let engine = Arc::new(ReconciliationEngine::new(
        dbs.monitor.clone(),
        Arc::new(MinecraftQuery::new(config.query_timeout)),
        config.tick_interval,
        config.failure_budget,
    ));

    let mut commands = modules::monitor::commands();
    commands.push(modules::system::shutdown());

    let intents =
        serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::MESSAGE_CONTENT;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions::<Data, Error> {
            allowed_mentions: Some(CreateAllowedMentions::new().empty_roles().empty_users()),
            commands,
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some("!".into()),
                case_insensitive_commands: true,
                ..Default::default()
            },
            owners: config.owners.clone(),
            initialize_owners: false,
            pre_command: |ctx| {
                Box::pin(async move {
                    trace!(
                        "Command {} used by {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        channel_label(ctx)
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command {} completed for {} in {}",
                        ctx.command().qualified_name,
                        ctx.author().tag(),
                        channel_label(ctx)
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            error!(
                                "Command {} failed for {} in {}: {:?}",
                                ctx.command().qualified_name,
                                ctx.author().tag(),
                                channel_label(ctx),
                                error
                            );
                        }
                        poise::FrameworkError::ArgumentParse { error, ctx, .. } => {
                            warn!(
                                "Bad arguments to {} from {}: {}",
                                ctx.command().qualified_name,
                                ctx.author().tag(),
                                error
                            );
                            if let Err(e) = ctx.say(usage_for(&ctx.command().name)).await {
                                error!("Failed to send usage: {}", e);
                            }
                        }
                        poise::FrameworkError::NotAnOwner { ctx, .. } => {
                            warn!(
                                "{} tried to run {} without being an owner",
                                ctx.author().tag(),
                                ctx.command().qualified_name
                            );
                        }
                        err => error!("Other framework error: {:?}", err),
                    }
                })
            },
            event_handler: |ctx, event, _framework, data| {
                Box::pin(async move {
                    data.event_manager.handle_event(ctx, event).await;
                    Ok(())
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, _framework| {
            Box::pin(async move {
                let task_manager = Arc::new(TaskManager::new());
                let event_manager = Arc::new(EventManager::new());

                event_manager
                    .add_handler(ReadyHandler::new(dbs.monitor.clone()))
                    .await;

                let data = Data {
                    dbs,
                    engine,
                    task_manager,
                    event_manager,
                };
                data.init_tasks(ctx).await;

                Ok(data)
            })
        })
        .build();

    let client = serenity::ClientBuilder::new(&config.token, intents)
        .framework(framework)
        .await;

    let mut client = match client {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create client: {}", e);
            return;
        }
    };

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    if let Err(e) = monitor_db.flush().await {
        error!("Failed to save servers on exit: {}", e);
    }
    info!("minewatch stopped");
}
