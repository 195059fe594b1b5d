use super::address::ServerAddress;
use super::database::{MonitorDatabase, TrackedTarget};
use super::query::{query_with_fallback, QueryError, QueryMode, ServerQuery, Snapshot};
use super::render::{self, Notification, PlayerDiff};
use crate::database::Database;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("no server at {0} is monitored here")]
    NotFound(ServerAddress),
    #[error("{} is already monitored here", .0.address)]
    Duplicate(Box<TrackedTarget>),
    #[error("could not validate {address}: {source}")]
    ValidationFailed {
        address: ServerAddress,
        #[source]
        source: QueryError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Healthy,
    Degraded,
    Evicted,
}

#[derive(Debug, PartialEq)]
pub enum Verdict {
    Unchanged,
    Changed(Notification),
    Degraded { remaining: Duration },
    Evicted(Notification),
}

pub fn state_of(target: &TrackedTarget) -> TargetState {
    if target.failure_budget.is_zero() {
        TargetState::Evicted
    } else if target.consecutive_failures > 0 {
        TargetState::Degraded
    } else {
        TargetState::Healthy
    }
}

/// Folds one poll outcome into `target`.
///
/// Success replaces the baseline and restores the budget. Failure spends one
/// `interval` of budget; the poll that exhausts it yields the only notification an
/// outage produces.
pub fn reconcile(
    target: &mut TrackedTarget,
    outcome: Result<(Snapshot, QueryMode), QueryError>,
    interval: Duration,
    budget: Duration,
    now: DateTime<Utc>,
) -> Verdict {
    match outcome {
        Ok((snapshot, mode)) => {
            if mode != target.query_mode {
                info!(
                    "{} answers over {} now, was {}",
                    target.address, mode, target.query_mode
                );
            }
            let body = match &target.known_players {
                None => Some(render::current_players(&snapshot.players)),
                Some(known) => {
                    let diff = PlayerDiff::between(known, &snapshot.players);
                    (!diff.is_empty()).then(|| {
                        render::player_changes(&diff, &snapshot.players, &target.display_name)
                    })
                }
            };

            target.known_players = Some(snapshot.players);
            target.failure_budget = budget;
            target.consecutive_failures = 0;
            target.query_mode = mode;
            target.last_seen = Some(now);

            match body {
                Some(body) => Verdict::Changed(
                    Notification::titled(&target.display_name, body).with_icon(snapshot.icon),
                ),
                None => Verdict::Unchanged,
            }
        }
        Err(e) => {
            target.failure_budget = target.failure_budget.saturating_sub(interval);
            target.consecutive_failures = target.consecutive_failures.saturating_add(1);
            if target.failure_budget.is_zero() {
                info!(
                    "Evicting {} for channel {} after {} failed polls: {}",
                    target.address, target.channel_id, target.consecutive_failures, e
                );
                Verdict::Evicted(render::eviction(target, budget))
            } else {
                warn!(
                    "Poll of {} failed ({}), {}s of budget left",
                    target.address,
                    e,
                    target.failure_budget.as_secs()
                );
                Verdict::Degraded {
                    remaining: target.failure_budget,
                }
            }
        }
    }
}

pub struct ReconciliationEngine {
    db: Database<MonitorDatabase>,
    query: Arc<dyn ServerQuery>,
    interval: Duration,
    budget: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        db: Database<MonitorDatabase>,
        query: Arc<dyn ServerQuery>,
        interval: Duration,
        budget: Duration,
    ) -> Self {
        Self {
            db,
            query,
            interval,
            budget,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls every target concurrently, then applies the results and saves once.
    ///
    /// Queries run without holding the store, so commands are only blocked for the
    /// apply step. Targets removed or re-added while their poll was in flight are
    /// skipped.
    pub async fn tick(&self) -> Vec<(u64, Notification)> {
        let started = Utc::now();
        let targets = self.db.read(|db| db.targets.clone()).await;
        if targets.is_empty() {
            return Vec::new();
        }

        let polls = targets.iter().map(|t| async move {
            let outcome = query_with_fallback(self.query.as_ref(), &t.address, t.query_mode).await;
            ((t.channel_id, t.address.clone()), outcome)
        });
        let outcomes = join_all(polls).await;
        let now = Utc::now();

        let result = self
            .db
            .transaction(|db| {
                let mut deliveries = Vec::new();
                let mut evicted = Vec::new();

                for ((channel_id, address), outcome) in outcomes {
                    let Some(target) = db.find_mut(channel_id, &address) else {
                        debug!("{} was removed mid-tick, dropping its result", address);
                        continue;
                    };
                    if target.last_seen.is_some_and(|seen| seen >= started) {
                        debug!("{} was re-added mid-tick, dropping its result", address);
                        continue;
                    }
                    match reconcile(target, outcome, self.interval, self.budget, now) {
                        Verdict::Unchanged => {
                            debug!("{}: no change ({:?})", address, state_of(target))
                        }
                        Verdict::Degraded { remaining } => {
                            debug!("{}: degraded, {:?} of budget left", address, remaining)
                        }
                        Verdict::Changed(n) => deliveries.push((channel_id, n)),
                        Verdict::Evicted(n) => {
                            deliveries.push((channel_id, n));
                            evicted.push((channel_id, address));
                        }
                    }
                }

                for (channel_id, address) in evicted {
                    db.remove(channel_id, &address);
                }
                Ok::<_, Infallible>(deliveries)
            })
            .await;

        match result {
            Ok(deliveries) => deliveries,
            Err(never) => match never {},
        }
    }

    /// Validates `address` with one poll and starts tracking it for `channel_id`.
    ///
    /// The validation poll seeds the baseline, so the first tick only reports
    /// changes since the add.
    pub async fn add(
        &self,
        channel_id: u64,
        address: ServerAddress,
        name: Option<String>,
    ) -> Result<(TrackedTarget, Snapshot), CommandError> {
        if let Some(existing) = self.db.get_target(channel_id, &address).await {
            return Err(CommandError::Duplicate(Box::new(existing)));
        }

        let (snapshot, mode) =
            query_with_fallback(self.query.as_ref(), &address, QueryMode::default())
                .await
                .map_err(|source| CommandError::ValidationFailed {
                    address: address.clone(),
                    source,
                })?;

        let display_name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| render::server_name(&snapshot, &address));

        let mut target = TrackedTarget::new(channel_id, address, display_name, self.budget);
        target.known_players = Some(snapshot.players.clone());
        target.query_mode = mode;
        target.last_seen = Some(Utc::now());

        let target = self
            .db
            .transaction(|db| {
                if let Some(existing) = db.find(channel_id, &target.address) {
                    return Err(CommandError::Duplicate(Box::new(existing.clone())));
                }
                db.targets.push(target.clone());
                Ok(target)
            })
            .await?;

        info!(
            "Now monitoring {} ({}) for channel {}",
            target.display_name, target.address, channel_id
        );
        Ok((target, snapshot))
    }

    pub async fn remove(
        &self,
        channel_id: u64,
        address: &ServerAddress,
    ) -> Result<Vec<TrackedTarget>, CommandError> {
        let removed = self
            .db
            .transaction(|db| {
                let removed = db.remove(channel_id, address);
                if removed.is_empty() {
                    Err(CommandError::NotFound(address.clone()))
                } else {
                    Ok(removed)
                }
            })
            .await?;

        info!("Stopped monitoring {} for channel {}", address, channel_id);
        Ok(removed)
    }

    pub async fn list(&self, channel_id: u64) -> Vec<TrackedTarget> {
        self.db.list_targets(channel_id).await
    }

    /// One-shot snapshot for `address` that never touches the store. Uses the
    /// channel's known query mode and name when the address is tracked there.
    pub async fn query_once(
        &self,
        channel_id: u64,
        address: &ServerAddress,
    ) -> Result<(String, Snapshot), QueryError> {
        let tracked = self.db.get_target(channel_id, address).await;
        let mode = tracked.as_ref().map(|t| t.query_mode).unwrap_or_default();

        let (snapshot, _) = query_with_fallback(self.query.as_ref(), address, mode).await?;
        let name = tracked
            .map(|t| t.display_name)
            .unwrap_or_else(|| render::server_name(&snapshot, address));
        Ok((name, snapshot))
    }
}
