//! Position input.
//!
//! The device's position sensor is an external collaborator. This module
//! defines what it delivers and the trait a sampler implements, plus a
//! sampler that replays recorded samples from a JSON-lines file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::geo::Coordinate;

/// One reading from the position sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Ground speed in metres per second, when the sensor reports one.
    #[serde(default, rename = "speed")]
    pub speed_mps: Option<f64>,
}

impl LocationSample {
    /// Create a sample.
    #[must_use]
    pub const fn new(lat: f64, lng: f64, speed_mps: Option<f64>) -> Self {
        Self { lat, lng, speed_mps }
    }

    /// The sample's position.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// What a sampler reports.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    /// A new position.
    Sample(LocationSample),
    /// Positioning is unavailable or was denied. Not fatal.
    Unavailable(String),
}

/// A source of position samples.
///
/// Samplers push events at whatever cadence the hardware gives them; the
/// consumer imposes no rate.
pub trait GeoSampler: Send {
    /// The name of this sampler (for logging).
    fn name(&self) -> &'static str;

    /// Start delivering events to `sender`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sampler cannot start.
    fn start(&mut self, sender: mpsc::Sender<SensorEvent>) -> Result<()>;

    /// Stop delivering events.
    fn stop(&mut self);

    /// Check if the sampler is delivering.
    fn is_running(&self) -> bool;
}

/// Replays recorded samples at a fixed interval.
#[derive(Debug)]
pub struct ReplaySampler {
    samples: Arc<[LocationSample]>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl ReplaySampler {
    /// Create a sampler over in-memory samples.
    #[must_use]
    pub fn new(samples: Vec<LocationSample>, interval: Duration) -> Self {
        Self {
            samples: samples.into(),
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load samples from a JSON-lines file such as
    /// `{"lat": 33.95, "lng": 130.96, "speed": 16.7}`.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line does not parse.
    pub fn from_jsonl(path: &Path, interval: Duration) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::new(parse_samples(&raw)?, interval))
    }

    /// Number of samples to replay.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if there is nothing to replay.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Parse JSON-lines samples.
///
/// # Errors
///
/// Returns [`Error::SampleParse`] naming the first bad line.
pub fn parse_samples(raw: &str) -> Result<Vec<LocationSample>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| Error::SampleParse {
                line: i + 1,
                message: e.to_string(),
            })
        })
        .collect()
}

impl GeoSampler for ReplaySampler {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn start(&mut self, sender: mpsc::Sender<SensorEvent>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::internal("replay sampler already running"));
        }
        let samples = Arc::clone(&self.samples);
        let running = Arc::clone(&self.running);
        let interval = self.interval;
        info!(samples = samples.len(), "starting replay");

        tokio::spawn(async move {
            for sample in samples.iter() {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if sender.send(SensorEvent::Sample(*sample)).await.is_err() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
            running.store(false, Ordering::SeqCst);
            debug!("replay finished");
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
