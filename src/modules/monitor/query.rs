use super::address::ServerAddress;
use super::protocol::{full, ping};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub players: BTreeSet<String>,
    /// Plain-text MOTD, if the server sent one.
    pub name: Option<String>,
    pub icon: Option<Vec<u8>>,
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("connection refused")]
    Refused,
    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("{0}")]
    Transport(#[source] std::io::Error),
    #[error("bad response: {0}")]
    Protocol(String),
}

impl QueryError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<std::io::Error> for QueryError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => Self::Refused,
            ErrorKind::UnexpectedEof | ErrorKind::InvalidData => Self::Protocol(e.to_string()),
            _ => Self::Transport(e),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryMode {
    /// GameSpy4 UDP query: authoritative roster, needs `enable-query=true`.
    #[default]
    FullQuery,
    /// Server List Ping over TCP: always on, roster may be a sample.
    StatusPing,
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullQuery => write!(f, "full query"),
            Self::StatusPing => write!(f, "status ping"),
        }
    }
}

#[async_trait]
pub trait ServerQuery: Send + Sync {
    async fn query(&self, address: &ServerAddress, mode: QueryMode)
        -> Result<Snapshot, QueryError>;
}

/// Queries real servers over the network, every step bounded by `timeout`.
#[derive(Debug, Clone)]
pub struct MinecraftQuery {
    timeout: Duration,
}

impl MinecraftQuery {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ServerQuery for MinecraftQuery {
    async fn query(
        &self,
        address: &ServerAddress,
        mode: QueryMode,
    ) -> Result<Snapshot, QueryError> {
        let work = async {
            match mode {
                QueryMode::FullQuery => full::query(address).await,
                QueryMode::StatusPing => ping::query(address).await,
            }
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout(self.timeout)),
        }
    }
}

/// Queries `address` starting from `mode`.
///
/// Full query falls back to a status ping when refused. The returned mode is the
/// one that answered, callers store it so a ping-only server skips straight to
/// the ping on later attempts.
pub async fn query_with_fallback(
    query: &dyn ServerQuery,
    address: &ServerAddress,
    mode: QueryMode,
) -> Result<(Snapshot, QueryMode), QueryError> {
    match mode {
        QueryMode::StatusPing => query
            .query(address, QueryMode::StatusPing)
            .await
            .map(|s| (s, QueryMode::StatusPing)),
        QueryMode::FullQuery => match query.query(address, QueryMode::FullQuery).await {
            Ok(snapshot) => Ok((snapshot, QueryMode::FullQuery)),
            Err(QueryError::Refused) => {
                debug!("Full query refused by {}, trying status ping", address);
                query
                    .query(address, QueryMode::StatusPing)
                    .await
                    .map(|s| (s, QueryMode::StatusPing))
            }
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted responses per (address, mode). An exhausted script answers with
    /// its last response forever.
    #[derive(Default)]
    pub struct ScriptedQuery {
        scripts: Mutex<HashMap<(ServerAddress, QueryMode), VecDeque<Scripted>>>,
        pub calls: Mutex<Vec<(ServerAddress, QueryMode)>>,
    }

    #[derive(Clone)]
    pub enum Scripted {
        Players(&'static [&'static str]),
        Named(&'static str, &'static [&'static str]),
        Refused,
        Timeout,
    }

    impl ScriptedQuery {
        pub fn push(&self, address: &ServerAddress, mode: QueryMode, response: Scripted) {
            self.scripts
                .lock()
                .unwrap()
                .entry((address.clone(), mode))
                .or_default()
                .push_back(response);
        }

        /// Replaces whatever is queued with a single standing response.
        pub fn set(&self, address: &ServerAddress, mode: QueryMode, response: Scripted) {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.entry((address.clone(), mode)).or_default();
            queue.clear();
            queue.push_back(response);
        }

        pub fn calls_for(&self, address: &ServerAddress) -> Vec<QueryMode> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| a == address)
                .map(|(_, m)| *m)
                .collect()
        }
    }

    #[async_trait]
    impl ServerQuery for ScriptedQuery {
        async fn query(
            &self,
            address: &ServerAddress,
            mode: QueryMode,
        ) -> Result<Snapshot, QueryError> {
            self.calls.lock().unwrap().push((address.clone(), mode));
            let response = {
                let mut scripts = self.scripts.lock().unwrap();
                match scripts.get_mut(&(address.clone(), mode)) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                }
            };

            let snapshot = |name: Option<&str>, players: &[&str]| Snapshot {
                players: players.iter().map(|p| p.to_string()).collect(),
                name: name.map(str::to_string),
                icon: None,
            };

            match response {
                Some(Scripted::Players(players)) => Ok(snapshot(None, players)),
                Some(Scripted::Named(name, players)) => Ok(snapshot(Some(name), players)),
                Some(Scripted::Timeout) => Err(QueryError::Timeout(Duration::from_secs(3))),
                Some(Scripted::Refused) | None => Err(QueryError::Refused),
            }
        }
    }
}
