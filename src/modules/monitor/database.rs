use super::address::ServerAddress;
use super::query::QueryMode;
use crate::database::Database;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedTarget {
    pub channel_id: u64,
    pub address: ServerAddress,
    pub display_name: String,
    /// `None` until a baseline roster exists; `Some(empty)` means the server was empty.
    pub known_players: Option<BTreeSet<String>>,
    pub failure_budget: Duration,
    pub query_mode: QueryMode,
    pub consecutive_failures: u32,
    pub last_seen: Option<DateTime<Utc>>,
}

impl TrackedTarget {
    pub fn new(
        channel_id: u64,
        address: ServerAddress,
        display_name: String,
        budget: Duration,
    ) -> Self {
        Self {
            channel_id,
            address,
            display_name,
            known_players: None,
            failure_budget: budget,
            query_mode: QueryMode::default(),
            consecutive_failures: 0,
            last_seen: None,
        }
    }

    pub fn matches(&self, channel_id: u64, address: &ServerAddress) -> bool {
        self.channel_id == channel_id && &self.address == address
    }
}

#[derive(Default, Serialize, Deserialize, Clone, Debug)]
pub struct MonitorDatabase {
    pub targets: Vec<TrackedTarget>,
}

impl MonitorDatabase {
    pub fn find(&self, channel_id: u64, address: &ServerAddress) -> Option<&TrackedTarget> {
        self.targets.iter().find(|t| t.matches(channel_id, address))
    }

    pub fn find_mut(
        &mut self,
        channel_id: u64,
        address: &ServerAddress,
    ) -> Option<&mut TrackedTarget> {
        self.targets.iter_mut().find(|t| t.matches(channel_id, address))
    }

    pub fn remove(&mut self, channel_id: u64, address: &ServerAddress) -> Vec<TrackedTarget> {
        let (removed, kept) = std::mem::take(&mut self.targets)
            .into_iter()
            .partition(|t| t.matches(channel_id, address));
        self.targets = kept;
        removed
    }

    pub fn in_channel(&self, channel_id: u64) -> Vec<TrackedTarget> {
        self.targets
            .iter()
            .filter(|t| t.channel_id == channel_id)
            .cloned()
            .collect()
    }
}

impl Database<MonitorDatabase> {
    pub async fn get_target(
        &self,
        channel_id: u64,
        address: &ServerAddress,
    ) -> Option<TrackedTarget> {
        self.read(|db| db.find(channel_id, address).cloned()).await
    }

    pub async fn list_targets(&self, channel_id: u64) -> Vec<TrackedTarget> {
        self.read(|db| db.in_channel(channel_id)).await
    }

    pub async fn count(&self) -> usize {
        self.read(|db| db.targets.len()).await
    }

    /// Clears the baseline of every target not seen within `max_age`, so the next
    /// successful poll reports a fresh roster instead of a diff against stale data.
    pub async fn reset_stale_baselines(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let stale = self
            .read(|db| {
                db.targets
                    .iter()
                    .filter(|t| t.known_players.is_some())
                    .filter(|t| t.last_seen.map_or(true, |seen| now - seen > max_age))
                    .count()
            })
            .await;
        if stale == 0 {
            return 0;
        }

        self.transaction(|db| {
            for target in db.targets.iter_mut() {
                if target
                    .last_seen
                    .map_or(true, |seen| now - seen > max_age)
                {
                    target.known_players = None;
                }
            }
            Ok::<_, std::convert::Infallible>(stale)
        })
        .await
        .unwrap_or(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn target(channel_id: u64, address: &str) -> TrackedTarget {
        TrackedTarget::new(
            channel_id,
            address.parse().unwrap(),
            address.to_string(),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn remove_takes_only_the_matching_pair() {
        let mut db = MonitorDatabase {
            targets: vec![target(1, "a"), target(2, "a"), target(1, "b")],
        };
        let removed = db.remove(1, &"a".parse().unwrap());
        assert_eq!(removed.len(), 1);
        assert_eq!(db.targets.len(), 2);
        assert!(db.find(2, &"a".parse().unwrap()).is_some());
        assert!(db.remove(3, &"a".parse().unwrap()).is_empty());
    }

    #[test]
    fn channel_listing_preserves_insertion_order() {
        let db = MonitorDatabase {
            targets: vec![target(1, "c"), target(2, "x"), target(1, "a"), target(1, "b")],
        };
        let names: Vec<_> = db
            .in_channel(1)
            .into_iter()
            .map(|t| t.display_name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn targets_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("servers.db");

        let db = Database::<MonitorDatabase>::new(&path).await.unwrap();
        let mut t = target(1, "host:25566");
        t.known_players = Some(["alice".to_string()].into_iter().collect());
        t.query_mode = QueryMode::StatusPing;
        db.transaction(|d| {
            d.targets.push(t.clone());
            Ok::<_, String>(())
        })
        .await
        .unwrap();

        let reloaded = Database::<MonitorDatabase>::new(&path).await.unwrap();
        assert_eq!(
            reloaded.get_target(1, &"host:25566".parse().unwrap()).await,
            Some(t)
        );
    }

    #[tokio::test]
    async fn stale_baselines_are_cleared() {
        let dir = tempdir().unwrap();
        let db = Database::<MonitorDatabase>::new(dir.path().join("servers.db"))
            .await
            .unwrap();
        let now = Utc::now();

        let mut fresh = target(1, "fresh");
        fresh.known_players = Some(BTreeSet::new());
        fresh.last_seen = Some(now - chrono::Duration::minutes(5));
        let mut stale = target(1, "stale");
        stale.known_players = Some(BTreeSet::new());
        stale.last_seen = Some(now - chrono::Duration::days(2));

        db.transaction(|d| {
            d.targets.push(fresh);
            d.targets.push(stale);
            Ok::<_, String>(())
        })
        .await
        .unwrap();

        let reset = db
            .reset_stale_baselines(Duration::from_secs(86400), now)
            .await;
        assert_eq!(reset, 1);
        let targets = db.list_targets(1).await;
        assert!(targets[0].known_players.is_some());
        assert!(targets[1].known_players.is_none());
    }
}
