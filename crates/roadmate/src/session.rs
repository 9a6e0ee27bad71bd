//! Per-device event loop.
//!
//! A [`Session`] owns a [`NavigationStore`] and feeds it from three sources:
//! position samples, remote changes, and user actions. Each event is applied
//! to completion before the next is taken. The session also owns the
//! notification display timer: when a notification has been active for the
//! configured duration it is cleared, unless it was replaced in the meantime.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::expense::ExpensePatch;
use crate::notification::NotificationDraft;
use crate::sensor::SensorEvent;
use crate::store::{NavigationState, NavigationStore};
use crate::sync::RemoteChange;
use crate::throttle::SignificantChange;

/// Something a user asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Select the next waypoint.
    SetNextWaypoint(String),
    /// Show a notification on every device.
    SendNotification(NotificationDraft),
    /// Dismiss the active notification.
    ClearNotification,
    /// Record an expense.
    AddExpense {
        /// What was paid for.
        title: String,
        /// Whole currency units.
        amount: i64,
        /// Member who paid.
        payer: String,
    },
    /// Edit an expense.
    UpdateExpense {
        /// Ledger entry id.
        id: String,
        /// Fields to change.
        patch: ExpensePatch,
    },
    /// Delete an expense.
    RemoveExpense(String),
    /// Clear the ledger.
    ResetAllData,
    /// Re-arm every geofence.
    RearmGeofences,
}

/// Counters for one session run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Position samples applied.
    pub samples: u64,
    /// Sensor unavailability reports.
    pub sensor_outages: u64,
    /// Geofences that fired.
    pub fences_fired: u64,
    /// Remote changes that altered local state.
    pub remote_changes: u64,
    /// User actions handled.
    pub actions: u64,
    /// Times the route would have been refetched.
    pub route_refreshes: u64,
    /// Notifications cleared by the display timer.
    pub notifications_expired: u64,
}

/// The event loop for one device.
#[derive(Debug)]
pub struct Session {
    store: NavigationStore,
    state: watch::Receiver<NavigationState>,
    display_for: Duration,
    route: SignificantChange,
    stats: SessionStats,
}

impl Session {
    /// Create a session around `store`.
    #[must_use]
    pub fn new(store: NavigationStore, display_for: Duration, route_threshold_m: f64) -> Self {
        let state = store.subscribe();
        Self {
            store,
            state,
            display_for,
            route: SignificantChange::new(route_threshold_m),
            stats: SessionStats::default(),
        }
    }

    /// Create a session with timings from `config`.
    #[must_use]
    pub fn from_config(store: NavigationStore, config: &Config) -> Self {
        Self::new(
            store,
            config.navigation.notification_display(),
            config.navigation.route_refresh_threshold_m,
        )
    }

    /// The store this session drives.
    #[must_use]
    pub fn store(&self) -> &NavigationStore {
        &self.store
    }

    /// Run until both the sensor stream and the action stream have ended.
    ///
    /// The remote stream is optional: when it ends the session keeps going
    /// on local input alone. Returns the store and the run's counters.
    pub async fn run(
        mut self,
        mut samples: mpsc::Receiver<SensorEvent>,
        mut remote: mpsc::Receiver<RemoteChange>,
        mut actions: mpsc::Receiver<Action>,
    ) -> (NavigationStore, SessionStats) {
        let mut sensor_open = true;
        let mut remote_open = true;
        let mut actions_open = true;
        let mut display: Option<(String, Instant)> = None;

        info!(route_threshold_m = self.route.threshold_m(), "session started");
        while sensor_open || actions_open {
            let deadline = display.as_ref().map(|(_, at)| *at);
            tokio::select! {
                event = samples.recv(), if sensor_open => match event {
                    Some(event) => self.handle_sensor(event),
                    None => {
                        debug!("sensor stream ended");
                        sensor_open = false;
                    }
                },
                change = remote.recv(), if remote_open => match change {
                    Some(change) => self.handle_remote(change),
                    None => {
                        warn!("remote stream ended; continuing offline");
                        remote_open = false;
                    }
                },
                action = actions.recv(), if actions_open => match action {
                    Some(action) => self.handle_action(action),
                    None => {
                        debug!("action stream ended");
                        actions_open = false;
                    }
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some((id, _)) = display.take() {
                        if self.store.expire_notification(&id) {
                            debug!(notification = %id, "notification display time elapsed");
                            self.stats.notifications_expired += 1;
                        }
                    }
                }
            }
            display = self.track_display(display);
        }
        info!(stats = ?self.stats, "session finished");

        (self.store, self.stats)
    }

    /// Restart the display timer whenever a different notification becomes
    /// active.
    fn track_display(&self, current: Option<(String, Instant)>) -> Option<(String, Instant)> {
        let active = self
            .state
            .borrow()
            .active_notification
            .as_ref()
            .map(|n| n.id.clone());
        match (current, active) {
            (Some((id, at)), Some(active)) if id == active => Some((id, at)),
            (_, Some(active)) => Some((active, Instant::now() + self.display_for)),
            (_, None) => None,
        }
    }

    fn handle_sensor(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Sample(sample) => {
                self.stats.samples += 1;
                if self.store.update_location(sample).is_some() {
                    self.stats.fences_fired += 1;
                }
                self.check_route();
            }
            SensorEvent::Unavailable(reason) => {
                self.stats.sensor_outages += 1;
                warn!(reason = %reason, "position unavailable; keeping last telemetry");
            }
        }
    }

    fn handle_remote(&mut self, change: RemoteChange) {
        let key = change.key();
        if self.store.apply_remote(change) {
            self.stats.remote_changes += 1;
            debug!(key = %key, "remote change applied");
            self.check_route();
        }
    }

    fn handle_action(&mut self, action: Action) {
        self.stats.actions += 1;
        match action {
            Action::SetNextWaypoint(id) => {
                self.store.set_next_waypoint(&id);
            }
            Action::SendNotification(draft) => {
                self.store.send_notification(draft);
            }
            Action::ClearNotification => self.store.clear_notification(),
            Action::AddExpense {
                title,
                amount,
                payer,
            } => {
                if let Err(e) = self.store.add_expense(title, amount, payer) {
                    warn!(error = %e, "expense rejected");
                }
            }
            Action::UpdateExpense { id, patch } => {
                if let Err(e) = self.store.update_expense(&id, &patch) {
                    warn!(expense = %id, error = %e, "expense update rejected");
                }
            }
            Action::RemoveExpense(id) => {
                self.store.remove_expense(&id);
            }
            Action::ResetAllData => self.store.reset_all_data(),
            Action::RearmGeofences => {
                // The trip starts over, so the route is fetched afresh.
                self.store.rearm_geofences();
                self.route.reset();
            }
        }
        self.check_route();
    }

    fn check_route(&mut self) {
        let (position, waypoint) = {
            let state = self.state.borrow();
            (state.location, state.next_waypoint.clone())
        };
        let Some(position) = position else {
            return;
        };
        if self.route.check(position, waypoint.as_deref()) {
            self.stats.route_refreshes += 1;
            debug!(
                lat = position.lat,
                lng = position.lng,
                waypoint = waypoint.as_deref().unwrap_or("-"),
                "route refresh"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationCategory;
    use crate::sensor::LocationSample;
    use crate::store::{Role, StoreOptions};
    use crate::sync::{MemoryBroker, RemoteSyncLayer};
    use crate::trip::Trip;
    use std::sync::Arc;

    fn session(display_for: Duration) -> Session {
        let sync = Arc::new(RemoteSyncLayer::new(Arc::new(MemoryBroker::new()), "test"));
        let store = NavigationStore::new(
            Trip::builtin(),
            StoreOptions::new(Role::Driver, "Taro", vec!["Taro".to_string()]),
            sync,
        );
        Session::new(store, display_for, 50.0)
    }

    fn sample(lat: f64, lng: f64) -> SensorEvent {
        SensorEvent::Sample(LocationSample::new(lat, lng, Some(20.0)))
    }

    #[tokio::test]
    async fn test_replay_counts() {
        let session = session(Duration::from_secs(60));
        let remote = session.store().sync().subscribe();
        let (sensor_tx, sensor_rx) = mpsc::channel(16);
        let (_, actions_rx) = mpsc::channel(1);

        sensor_tx.send(sample(33.9000, 130.9000)).await.unwrap();
        sensor_tx.send(sample(33.9598, 130.9616)).await.unwrap();
        sensor_tx.send(sample(33.9598, 130.9616)).await.unwrap();
        sensor_tx
            .send(SensorEvent::Unavailable("permission denied".to_string()))
            .await
            .unwrap();
        drop(sensor_tx);

        let (store, stats) = session.run(sensor_rx, remote, actions_rx).await;
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.sensor_outages, 1);
        assert_eq!(stats.fences_fired, 1);
        assert_eq!(stats.route_refreshes, 2);
        assert_eq!(store.state().area_text, "Kanmon Straits");
    }

    #[tokio::test]
    async fn test_actions_apply() {
        let session = session(Duration::from_secs(60));
        let (_, sensor_rx) = mpsc::channel(1);
        let (_, remote_rx) = mpsc::channel(1);
        let (actions_tx, actions_rx) = mpsc::channel(16);

        actions_tx
            .send(Action::SetNextWaypoint("kokura".to_string()))
            .await
            .unwrap();
        actions_tx
            .send(Action::SetNextWaypoint("atlantis".to_string()))
            .await
            .unwrap();
        actions_tx
            .send(Action::AddExpense {
                title: "Gas".to_string(),
                amount: 5000,
                payer: "Nobody".to_string(),
            })
            .await
            .unwrap();
        drop(actions_tx);

        let (store, stats) = session.run(sensor_rx, remote_rx, actions_rx).await;
        assert_eq!(stats.actions, 3);
        assert_eq!(store.state().next_waypoint.as_deref(), Some("kokura"));
    }

    #[tokio::test]
    async fn test_rearm_refreshes_route() {
        let session = session(Duration::from_secs(60));
        let mut state = session.store().subscribe();
        let (sensor_tx, sensor_rx) = mpsc::channel(4);
        let (_, remote_rx) = mpsc::channel(1);
        let (actions_tx, actions_rx) = mpsc::channel(4);
        let handle = tokio::spawn(session.run(sensor_rx, remote_rx, actions_rx));

        sensor_tx.send(sample(33.9000, 130.9000)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| s.location.is_some()))
            .await
            .unwrap()
            .unwrap();

        actions_tx.send(Action::ClearNotification).await.unwrap();
        actions_tx.send(Action::RearmGeofences).await.unwrap();
        drop(actions_tx);
        drop(sensor_tx);

        let (_, stats) = handle.await.unwrap();
        assert_eq!(stats.actions, 2);
        assert_eq!(stats.route_refreshes, 2);
    }

    #[tokio::test]
    async fn test_display_timer_clears_notification() {
        let session = session(Duration::from_millis(200));
        let mut state = session.store().subscribe();
        let (_, sensor_rx) = mpsc::channel(1);
        let (_, remote_rx) = mpsc::channel(1);
        let (actions_tx, actions_rx) = mpsc::channel(4);
        let handle = tokio::spawn(session.run(sensor_rx, remote_rx, actions_rx));

        actions_tx
            .send(Action::SendNotification(NotificationDraft::new(
                NotificationCategory::Info,
                "Fuel stop in 5 km",
                "Taro",
            )))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            state.wait_for(|s| s.active_notification.is_some()).await.unwrap();
            state.wait_for(|s| s.active_notification.is_none()).await.unwrap();
        })
        .await
        .unwrap();

        drop(actions_tx);
        let (_, stats) = handle.await.unwrap();
        assert_eq!(stats.notifications_expired, 1);
    }
}
