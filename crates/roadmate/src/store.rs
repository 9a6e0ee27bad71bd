//! The per-device navigation state container.
//!
//! [`NavigationStore`] owns the canonical [`NavigationState`] for one device
//! and publishes it through a `tokio::sync::watch` channel. Every mutation
//! lands as a single `send_modify`/`send_if_modified`, so subscribers never
//! observe a half-applied update.
//!
//! Local intent is pushed to the [`RemoteSyncLayer`] without waiting; remote
//! changes come back in through [`NavigationStore::apply_remote`]. The expense
//! ledger is only ever filled from the remote echo.

use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::expense::{Expense, ExpenseDraft, ExpensePatch};
use crate::geo::{format_distance, AreaBands, Coordinate};
use crate::geofence::GeofenceEngine;
use crate::notification::{AppNotification, NotificationCategory, NotificationDraft};
use crate::sensor::LocationSample;
use crate::sync::{RemoteChange, RemoteSyncLayer};
use crate::trip::{GeoFence, Trip, Waypoint};

/// Shown in the area field before the first sample arrives.
pub const LOCATING_TEXT: &str = "Locating...";

/// Shown in distance fields that have nothing to measure.
pub const NO_DISTANCE_TEXT: &str = "--";

/// Shown in the ETA field when there is no ETA.
pub const NO_ETA_TEXT: &str = "--:--";

/// Default speed used to project arrival times.
pub const DEFAULT_PLANNING_SPEED_KMH: f64 = 80.0;

/// Which console this device is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The driver's console.
    #[default]
    Driver,
    /// A passenger's console.
    Passenger,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver => write!(f, "driver"),
            Self::Passenger => write!(f, "passenger"),
        }
    }
}

/// Everything one device knows about the trip right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    /// Console role.
    pub role: Role,
    /// Active user identity.
    pub user: String,
    /// Last sampled position.
    pub location: Option<Coordinate>,
    /// Speed from the last sample, whole km/h.
    pub speed_kmh: u32,
    /// Coarse area name.
    pub area_text: String,
    /// Name of and distance to the next waypoint.
    pub distance_text: String,
    /// Name of and distance to the final waypoint.
    pub goal_text: String,
    /// Arrival time at the next waypoint, `HH:MM`.
    pub eta_text: String,
    /// Arrival time at the next waypoint.
    pub eta: Option<DateTime<Local>>,
    /// The single active notification.
    pub active_notification: Option<AppNotification>,
    /// The fixed waypoint sequence.
    pub waypoints: Vec<Waypoint>,
    /// Id of the selected next waypoint.
    pub next_waypoint: Option<String>,
    /// Expense ledger, newest first.
    pub expenses: Vec<Expense>,
}

impl NavigationState {
    fn new(role: Role, user: String, waypoints: Vec<Waypoint>) -> Self {
        Self {
            role,
            user,
            location: None,
            speed_kmh: 0,
            area_text: LOCATING_TEXT.to_string(),
            distance_text: NO_DISTANCE_TEXT.to_string(),
            goal_text: NO_DISTANCE_TEXT.to_string(),
            eta_text: NO_ETA_TEXT.to_string(),
            eta: None,
            active_notification: None,
            waypoints,
            next_waypoint: None,
            expenses: Vec::new(),
        }
    }

    /// Look up a waypoint in the sequence.
    #[must_use]
    pub fn waypoint(&self, id: &str) -> Option<&Waypoint> {
        self.waypoints.iter().find(|w| w.id == id)
    }

    /// The selected next waypoint.
    #[must_use]
    pub fn next_waypoint(&self) -> Option<&Waypoint> {
        self.next_waypoint.as_deref().and_then(|id| self.waypoint(id))
    }

    /// The final waypoint.
    #[must_use]
    pub fn goal(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }
}

/// Per-device settings for a store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Console role.
    pub role: Role,
    /// Active user identity.
    pub user: String,
    /// Who may appear as an expense payer.
    pub members: Vec<String>,
    /// Speed used to project arrival times.
    pub planning_speed_kmh: f64,
    /// Longitude band table for area names.
    pub bands: AreaBands,
}

impl StoreOptions {
    /// Options for `user` with every other setting at its default.
    #[must_use]
    pub fn new(role: Role, user: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            role,
            user: user.into(),
            members,
            planning_speed_kmh: DEFAULT_PLANNING_SPEED_KMH,
            bands: AreaBands::builtin(),
        }
    }

    /// Options taken from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            role: config.device.role,
            user: config.device.user.clone(),
            members: config.trip.members.clone(),
            planning_speed_kmh: config.navigation.planning_speed_kmh,
            bands: AreaBands::builtin(),
        }
    }
}

/// Derives the telemetry strings from a position.
#[derive(Debug, Clone)]
struct Telemetry {
    bands: AreaBands,
    planning_speed_kmh: f64,
}

impl Telemetry {
    /// Recompute area, distance, goal, and ETA from the state's location.
    ///
    /// Without a location the fields keep their current values.
    fn refresh(&self, state: &mut NavigationState, now: DateTime<Local>) {
        let Some(position) = state.location else {
            return;
        };
        state.area_text = self.bands.area_name_for(position.lng).to_string();

        let next = state
            .next_waypoint()
            .map(|w| (w.name.clone(), position.distance_km(&w.coords)));
        match next {
            Some((name, km)) => {
                state.distance_text = format!("{name}: {}", format_distance(km));
                state.eta = self.project_arrival(km, now);
                state.eta_text = state
                    .eta
                    .map_or_else(|| NO_ETA_TEXT.to_string(), |t| t.format("%H:%M").to_string());
            }
            None => {
                state.distance_text = NO_DISTANCE_TEXT.to_string();
                state.eta = None;
                state.eta_text = NO_ETA_TEXT.to_string();
            }
        }

        state.goal_text = state.goal().map_or_else(
            || NO_DISTANCE_TEXT.to_string(),
            |g| format!("{}: {}", g.name, format_distance(position.distance_km(&g.coords))),
        );
    }

    /// `now + km / planning speed`, independent of the sensed speed.
    #[allow(clippy::cast_possible_truncation)]
    fn project_arrival(&self, km: f64, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let seconds = (km / self.planning_speed_kmh * 3600.0).round();
        if !seconds.is_finite() {
            return None;
        }
        now.checked_add_signed(TimeDelta::try_seconds(seconds as i64)?)
    }
}

/// Convert a sensed speed to whole km/h. Missing or nonsensical speeds are 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn speed_kmh(speed_mps: Option<f64>) -> u32 {
    match speed_mps {
        Some(mps) if mps.is_finite() && mps > 0.0 => (mps * 3.6).round() as u32,
        _ => 0,
    }
}

/// The navigation state container for one device.
#[derive(Debug)]
pub struct NavigationStore {
    state: watch::Sender<NavigationState>,
    geofences: GeofenceEngine,
    telemetry: Telemetry,
    sync: Arc<RemoteSyncLayer>,
    members: Vec<String>,
}

impl NavigationStore {
    /// Create a store for `trip`. Every fence starts armed.
    #[must_use]
    pub fn new(trip: Trip, options: StoreOptions, sync: Arc<RemoteSyncLayer>) -> Self {
        let Trip {
            waypoints,
            geofences,
        } = trip;
        let (state, _) = watch::channel(NavigationState::new(options.role, options.user, waypoints));
        Self {
            state,
            geofences: GeofenceEngine::new(geofences),
            telemetry: Telemetry {
                bands: options.bands,
                planning_speed_kmh: options.planning_speed_kmh,
            },
            sync,
            members: options.members,
        }
    }

    /// Watch the state. The receiver sees the current value immediately.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.state.subscribe()
    }

    /// A copy of the current state.
    #[must_use]
    pub fn state(&self) -> NavigationState {
        self.state.borrow().clone()
    }

    /// The sync layer this store pushes to.
    #[must_use]
    pub fn sync(&self) -> &Arc<RemoteSyncLayer> {
        &self.sync
    }

    /// The fence set and its triggered flags.
    #[must_use]
    pub fn geofences(&self) -> &[GeoFence] {
        self.geofences.fences()
    }

    /// Members allowed as expense payers.
    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.members
    }

    fn stamp(&self, draft: NotificationDraft) -> AppNotification {
        draft.into_notification(self.sync.generate_id(), Utc::now())
    }

    /// Apply one position sample.
    ///
    /// Returns the notification raised by a geofence, if one fired.
    pub fn update_location(&mut self, sample: LocationSample) -> Option<AppNotification> {
        self.update_location_at(sample, Local::now())
    }

    /// [`update_location`](Self::update_location) with an explicit clock.
    pub fn update_location_at(
        &mut self,
        sample: LocationSample,
        now: DateTime<Local>,
    ) -> Option<AppNotification> {
        let position = sample.coordinate();

        let hit = self.geofences.evaluate(position).map(|fence| {
            (
                fence.id.clone(),
                NotificationDraft::location_trigger(
                    fence.announcement.text.clone(),
                    fence.announcement.speech(),
                ),
            )
        });
        let fired = hit.map(|(fence_id, draft)| {
            self.geofences.mark_triggered(&fence_id);
            let notification = draft.into_notification(
                self.sync.generate_id(),
                now.with_timezone(&Utc),
            );
            info!(fence = %fence_id, notification = %notification.id, "geofence triggered");
            notification
        });

        let telemetry = &self.telemetry;
        self.state.send_modify(|s| {
            s.location = Some(position);
            s.speed_kmh = speed_kmh(sample.speed_mps);
            telemetry.refresh(s, now);
            if let Some(notification) = &fired {
                s.active_notification = Some(notification.clone());
            }
            debug!(area = %s.area_text, distance = %s.distance_text, eta = %s.eta_text, "location applied");
        });

        if let Some(notification) = &fired {
            self.sync.push_notification(Some(notification));
        }
        fired
    }

    /// Select the next waypoint and announce it.
    ///
    /// An id that is not in the sequence is ignored and `false` is returned;
    /// nothing is changed or published.
    pub fn set_next_waypoint(&self, id: &str) -> bool {
        let Some(waypoint) = self.state.borrow().waypoint(id).cloned() else {
            debug!(waypoint = %id, "ignoring unknown waypoint");
            return false;
        };

        let user = self.state.borrow().user.clone();
        let notification = self.stamp(NotificationDraft::new(
            NotificationCategory::Info,
            format!("Next stop: {}", waypoint.name),
            user,
        ));

        let telemetry = &self.telemetry;
        self.state.send_modify(|s| {
            s.next_waypoint = Some(waypoint.id.clone());
            telemetry.refresh(s, Local::now());
            s.active_notification = Some(notification.clone());
        });
        info!(waypoint = %waypoint.id, "next waypoint set");

        self.sync.push_next_waypoint(&waypoint);
        self.sync.push_notification(Some(&notification));
        true
    }

    /// Replace the active notification.
    pub fn send_notification(&self, draft: NotificationDraft) -> AppNotification {
        let notification = self.stamp(draft);
        self.state.send_modify(|s| {
            s.active_notification = Some(notification.clone());
        });
        debug!(notification = %notification.id, category = %notification.category, "notification sent");
        self.sync.push_notification(Some(&notification));
        notification
    }

    /// Clear the active notification, locally and remotely. Idempotent.
    pub fn clear_notification(&self) {
        self.state
            .send_if_modified(|s| s.active_notification.take().is_some());
        self.sync.push_notification(None);
    }

    /// Clear the active notification only if it is still `id`.
    ///
    /// Used by the display timer so a newer notification is not cut short.
    pub fn expire_notification(&self, id: &str) -> bool {
        let current = self
            .state
            .borrow()
            .active_notification
            .as_ref()
            .is_some_and(|n| n.id == id);
        if current {
            self.clear_notification();
        }
        current
    }

    /// Record a new expense. It shows up in the ledger once the broker
    /// echoes it back.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative amount or an unknown payer.
    pub fn add_expense(
        &self,
        title: impl Into<String>,
        amount: i64,
        payer: impl Into<String>,
    ) -> Result<Expense> {
        let draft = ExpenseDraft::new(title, amount, payer);
        draft.validate(&self.members)?;
        let expense = self.sync.create_expense(draft);
        info!(expense = %expense.id, amount = expense.amount, payer = %expense.payer, "expense added");
        Ok(expense)
    }

    /// Change fields of a ledger entry.
    ///
    /// Returns `false` when the id is not in the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative amount or an unknown payer.
    pub fn update_expense(&self, id: &str, patch: &ExpensePatch) -> Result<bool> {
        patch.validate(&self.members)?;
        if !self.has_expense(id) {
            debug!(expense = %id, "ignoring update of unknown expense");
            return Ok(false);
        }
        self.sync.update_expense(id, patch);
        Ok(true)
    }

    /// Delete a ledger entry. Returns `false` when the id is not in the ledger.
    pub fn remove_expense(&self, id: &str) -> bool {
        if !self.has_expense(id) {
            debug!(expense = %id, "ignoring removal of unknown expense");
            return false;
        }
        self.sync.remove_expense(id);
        true
    }

    fn has_expense(&self, id: &str) -> bool {
        self.state.borrow().expenses.iter().any(|e| e.id == id)
    }

    /// Delete every expense. Geofences and the waypoint selection are left
    /// as they are.
    pub fn reset_all_data(&self) {
        info!("clearing expense ledger");
        self.sync.clear_ledger();
    }

    /// Re-arm every geofence.
    pub fn rearm_geofences(&mut self) {
        self.geofences.rearm_all();
        info!("geofences re-armed");
    }

    /// Merge a change received from the broker.
    ///
    /// Returns `true` if the state changed. Repeated deliveries of the same
    /// value do not wake subscribers.
    pub fn apply_remote(&self, change: RemoteChange) -> bool {
        match change {
            RemoteChange::NextWaypoint(waypoint) => {
                let id = waypoint.map(|w| w.id);
                if let Some(id) = &id {
                    if self.state.borrow().waypoint(id).is_none() {
                        warn!(waypoint = %id, "remote next waypoint is not part of this trip");
                        return false;
                    }
                }
                self.sync.observe_remote_waypoint(id.as_deref());
                let telemetry = &self.telemetry;
                self.state.send_if_modified(|s| {
                    if s.next_waypoint == id {
                        return false;
                    }
                    s.next_waypoint = id;
                    telemetry.refresh(s, Local::now());
                    true
                })
            }
            RemoteChange::ActiveNotification(notification) => {
                self.state.send_if_modified(|s| {
                    if s.active_notification == notification {
                        return false;
                    }
                    s.active_notification = notification;
                    true
                })
            }
            RemoteChange::Ledger(expenses) => self.state.send_if_modified(|s| {
                if s.expenses == expenses {
                    return false;
                }
                debug!(entries = expenses.len(), "ledger updated");
                s.expenses = expenses;
                true
            }),
        }
    }
}
