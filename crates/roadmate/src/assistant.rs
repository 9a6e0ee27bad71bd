//! Request and reply shapes for the AI chat proxy.
//!
//! The proxy itself is an external service. This module only builds the
//! request the core is responsible for supplying; `roadmate ask` prints it.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::store::NavigationState;

/// Trip context attached to a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    /// Last known position.
    pub location: Option<Coordinate>,
    /// Display name of the next waypoint.
    pub next_waypoint: Option<String>,
    /// Current speed in km/h.
    pub speed: u32,
}

impl From<&NavigationState> for ChatContext {
    fn from(state: &NavigationState) -> Self {
        Self {
            location: state.location,
            next_waypoint: state.next_waypoint().map(|w| w.name.clone()),
            speed: state.speed_kmh,
        }
    }
}

/// A message to the chat proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// What the user said.
    pub message: String,
    /// Where the trip stands.
    pub context: ChatContext,
}

impl ChatRequest {
    /// Build a request from the user's message and the current state.
    #[must_use]
    pub fn new(message: impl Into<String>, state: &NavigationState) -> Self {
        Self {
            message: message.into(),
            context: ChatContext::from(state),
        }
    }
}
