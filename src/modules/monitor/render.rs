use super::address::ServerAddress;
use super::database::TrackedTarget;
use super::query::{QueryError, Snapshot};
use poise::serenity_prelude::{CreateAttachment, CreateEmbed};
use std::collections::BTreeSet;
use std::time::Duration;

const DEFAULT_MOTD: &str = "A Minecraft Server";
const ICON_FILE: &str = "icon.png";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub title: Option<String>,
    pub body: String,
    pub fields: Vec<(String, String)>,
    pub icon: Option<Vec<u8>>,
}

impl Notification {
    pub fn titled(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn untitled(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self::titled("Error", body)
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn with_icon(mut self, icon: Option<Vec<u8>>) -> Self {
        self.icon = icon;
        self
    }

    pub fn embed(&self) -> CreateEmbed {
        let mut embed = CreateEmbed::new();
        if !self.body.is_empty() {
            embed = embed.description(&self.body);
        }
        if let Some(title) = &self.title {
            embed = embed.title(title);
        }
        for (name, value) in &self.fields {
            embed = embed.field(name, value, false);
        }
        if self.icon.is_some() {
            embed = embed.thumbnail(format!("attachment://{ICON_FILE}"));
        }
        embed
    }

    pub fn attachment(&self) -> Option<CreateAttachment> {
        self.icon
            .clone()
            .map(|bytes| CreateAttachment::bytes(bytes, ICON_FILE))
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct PlayerDiff {
    pub joined: Vec<String>,
    pub left: Vec<String>,
}

impl PlayerDiff {
    pub fn between(known: &BTreeSet<String>, current: &BTreeSet<String>) -> Self {
        Self {
            joined: current.difference(known).cloned().collect(),
            left: known.difference(current).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }
}

/// The server's own name unless it is blank or the vanilla default.
pub fn server_name(snapshot: &Snapshot, address: &ServerAddress) -> String {
    match snapshot.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() && name != DEFAULT_MOTD => name.to_string(),
        _ => address.to_string(),
    }
}

pub fn current_players(players: &BTreeSet<String>) -> String {
    let names = if players.is_empty() {
        "None".to_string()
    } else {
        players.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!("Current Players Online: **{names}**")
}

pub fn player_changes(diff: &PlayerDiff, current: &BTreeSet<String>, name: &str) -> String {
    let mut message = String::new();
    for player in &diff.joined {
        message.push_str(&format!("**{player}** has joined {name}\n"));
    }
    for player in &diff.left {
        message.push_str(&format!("**{player}** has left {name}\n"));
    }
    message.push_str(&current_players(current));
    message
}

pub fn unreachable(address: &ServerAddress, error: &QueryError) -> String {
    match error {
        QueryError::Protocol(_) => format!("Error looking up {address}: {error}"),
        _ => format!("Unable to reach server at {address}: {error}"),
    }
}

pub fn eviction(target: &TrackedTarget, budget: Duration) -> Notification {
    Notification::titled(
        &target.display_name,
        format!(
            "Unable to reach server for more than {}\nmonitoring stopped for {}",
            human_duration(budget),
            target.display_name
        ),
    )
}

pub fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (n, unit) = match secs {
        s if s >= 3600 && s % 3600 == 0 => (s / 3600, "hour"),
        s if s >= 60 && s % 60 == 0 => (s / 60, "minute"),
        s => (s, "second"),
    };
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
