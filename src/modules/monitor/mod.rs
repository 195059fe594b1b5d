//! Minecraft server monitoring: tracks servers per channel and reports players
//! joining and leaving.

pub mod address;
pub mod commands;
pub mod database;
pub mod engine;
pub mod notify;
pub mod protocol;
pub mod query;
pub mod render;
pub mod task;

use commands::*;

pub fn commands() -> Vec<poise::Command<crate::Data, crate::Error>> {
    vec![start(), stop(), query(), list(), help()]
}
