use super::address::ServerAddress;
use super::engine::{CommandError, ReconciliationEngine};
use super::render::{self, Notification};
use crate::{Context, Error};
use poise::CreateReply;

pub const START_USAGE: &str = "Usage: !Start <ip_address>[:port] [Server Name]";
pub const STOP_USAGE: &str = "Usage: !Stop <ip_address>[:port]";
pub const QUERY_USAGE: &str = "Usage: !Query <ip_address>[:port]";
pub const LIST_USAGE: &str = "Usage: !List";
pub const HELP_USAGE: &str = "Usage: !Help";

pub fn usage_for(command: &str) -> &'static str {
    match command.to_ascii_lowercase().as_str() {
        "start" => START_USAGE,
        "stop" => STOP_USAGE,
        "query" => QUERY_USAGE,
        "list" => LIST_USAGE,
        "help" => HELP_USAGE,
        _ => "Use !Help for more info",
    }
}

#[derive(Debug, PartialEq)]
pub enum Reply {
    Text(String),
    Embed(Notification),
}

async fn send(ctx: Context<'_>, reply: Reply) -> Result<(), Error> {
    match reply {
        Reply::Text(text) => {
            ctx.say(text).await?;
        }
        Reply::Embed(notification) => {
            let mut reply = CreateReply::default().embed(notification.embed());
            if let Some(icon) = notification.attachment() {
                reply = reply.attachment(icon);
            }
            ctx.send(reply).await?;
        }
    }
    Ok(())
}

pub fn parse_target(args: Option<&str>) -> Option<(ServerAddress, Option<String>)> {
    let args = args?.trim();
    let (address, rest) = match args.split_once(char::is_whitespace) {
        Some((address, rest)) => (address, Some(rest)),
        None => (args, None),
    };
    let address = address.parse().ok()?;
    let name = rest
        .map(|r| r.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|r| !r.is_empty());
    Some((address, name))
}

impl CommandError {
    pub fn reply(&self) -> Reply {
        match self {
            CommandError::NotFound(address) => Reply::Text(format!(
                "Unable to find server at {address}\n\
                 Try using !List to see all servers being monitored in this channel"
            )),
            CommandError::Duplicate(existing) => Reply::Embed(Notification::titled(
                &existing.display_name,
                format!(
                    "Already monitoring {}\n{}",
                    existing.display_name,
                    render::current_players(&existing.known_players.clone().unwrap_or_default())
                ),
            )),
            CommandError::ValidationFailed { address, source } => {
                Reply::Embed(Notification::error(render::unreachable(address, source)))
            }
        }
    }
}

pub async fn start_reply(
    engine: &ReconciliationEngine,
    channel_id: u64,
    args: Option<&str>,
) -> Reply {
    let Some((address, name)) = parse_target(args) else {
        return Reply::Text(START_USAGE.to_string());
    };

    match engine.add(channel_id, address, name).await {
        Ok((target, snapshot)) => Reply::Embed(
            Notification::titled(
                &target.display_name,
                format!(
                    "Now monitoring {}\n{}",
                    target.display_name,
                    render::current_players(&snapshot.players)
                ),
            )
            .with_icon(snapshot.icon),
        ),
        Err(e) => e.reply(),
    }
}

pub async fn stop_reply(
    engine: &ReconciliationEngine,
    channel_id: u64,
    args: Option<&str>,
) -> Reply {
    let Some((address, _)) = parse_target(args) else {
        return Reply::Text(STOP_USAGE.to_string());
    };

    match engine.remove(channel_id, &address).await {
        Ok(removed) => {
            let title = removed
                .first()
                .map(|t| t.display_name.clone())
                .unwrap_or_else(|| address.to_string());
            let body = removed
                .iter()
                .map(|t| format!("No longer monitoring {}", t.display_name))
                .collect::<Vec<_>>()
                .join("\n");
            Reply::Embed(Notification::titled(title, body))
        }
        Err(e) => e.reply(),
    }
}

pub async fn query_reply(
    engine: &ReconciliationEngine,
    channel_id: u64,
    args: Option<&str>,
) -> Reply {
    let Some((address, _)) = parse_target(args) else {
        return Reply::Text(QUERY_USAGE.to_string());
    };

    match engine.query_once(channel_id, &address).await {
        Ok((name, snapshot)) => Reply::Embed(
            Notification::titled(name, render::current_players(&snapshot.players))
                .with_icon(snapshot.icon),
        ),
        Err(e) => Reply::Embed(Notification::error(render::unreachable(&address, &e))),
    }
}

pub async fn list_reply(engine: &ReconciliationEngine, channel_id: u64) -> Reply {
    let targets = engine.list(channel_id).await;
    if targets.is_empty() {
        return Reply::Embed(Notification::untitled(
            "Not currently monitoring any servers\n\
             Use !Start <ip_address> to start monitoring a server\n\
             Use !Help for more info",
        ));
    }

    let mut reply = String::from("Currently Monitoring:\n");
    for target in &targets {
        if target.display_name == target.address.to_string() {
            reply.push_str(&format!("\t{}\n", target.display_name));
        } else {
            reply.push_str(&format!("\t{} ({})\n", target.display_name, target.address));
        }
    }
    Reply::Embed(Notification::untitled(reply))
}

pub fn help_reply() -> Reply {
    Reply::Embed(
        Notification::titled("Help", "")
            .field("Query", "!Query <ip_address>[:port] - List Current Players")
            .field(
                "Start",
                "!Start <ip_address>[:port] [Server Name] - Start monitoring <ip_address>\n\
                 Server Name is optional",
            )
            .field("Stop", "!Stop <ip_address>[:port] - Stop monitoring <ip_address>")
            .field(
                "List",
                "!List - List all servers being monitored in this channel",
            )
            .field("Help", "!Help - Print this Message"),
    )
}

/// Start monitoring a server in this channel
#[poise::command(prefix_command, category = "Monitor")]
pub async fn start(ctx: Context<'_>, #[rest] args: Option<String>) -> Result<(), Error> {
    let reply = start_reply(&ctx.data().engine, ctx.channel_id().get(), args.as_deref()).await;
    send(ctx, reply).await
}

/// Stop monitoring a server in this channel
#[poise::command(prefix_command, category = "Monitor")]
pub async fn stop(ctx: Context<'_>, #[rest] args: Option<String>) -> Result<(), Error> {
    let reply = stop_reply(&ctx.data().engine, ctx.channel_id().get(), args.as_deref()).await;
    send(ctx, reply).await
}

/// Show who is online right now
#[poise::command(prefix_command, category = "Monitor")]
pub async fn query(ctx: Context<'_>, #[rest] args: Option<String>) -> Result<(), Error> {
    let reply = query_reply(&ctx.data().engine, ctx.channel_id().get(), args.as_deref()).await;
    send(ctx, reply).await
}

/// List the servers monitored in this channel
#[poise::command(prefix_command, aliases("l"), category = "Monitor")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let reply = list_reply(&ctx.data().engine, ctx.channel_id().get()).await;
    send(ctx, reply).await
}

/// Print usage
#[poise::command(prefix_command, aliases("h"), category = "Monitor")]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    send(ctx, help_reply()).await
}
