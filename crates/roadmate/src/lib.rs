//! `roadmate` - Shared trip state for driver and passenger consoles
//!
//! This library keeps a small shared mission state (next waypoint, one
//! active notification, an expense ledger) in step across devices through a
//! last-write-wins document broker, and derives per-device navigation
//! telemetry and one-shot geofence announcements from position samples.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod assistant;
pub mod cli;
pub mod config;
pub mod error;
pub mod expense;
pub mod geo;
pub mod geofence;
pub mod logging;
pub mod notification;
pub mod sensor;
pub mod session;
pub mod store;
pub mod sync;
pub mod throttle;
pub mod trip;

pub use config::Config;
pub use error::{Error, Result};
pub use expense::{Expense, ExpensePatch};
pub use geo::{haversine_distance_km, AreaBands, Coordinate};
pub use geofence::GeofenceEngine;
pub use logging::init_logging;
pub use notification::{AppNotification, NotificationCategory, NotificationDraft};
pub use sensor::{GeoSampler, LocationSample, ReplaySampler, SensorEvent};
pub use session::{Action, Session, SessionStats};
pub use store::{NavigationState, NavigationStore, Role, StoreOptions};
pub use sync::{DocumentBroker, MemoryBroker, RemoteChange, RemoteSyncLayer, SqliteBroker};
pub use throttle::SignificantChange;
pub use trip::{GeoFence, Trip, Waypoint};
