use std::{io::Read, path::Path, time::Duration};

use activity_tracker_lib::location_sample::LocationSample;
use activity_tracker_session::location::ChannelLocationSource;
use anyhow::Context;
use chrono::{DateTime, Utc};

/// Accuracy reported for points without an HDOP value, in meters.
const DEFAULT_ACCURACY_M: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    /// Time since the first point of the track.
    pub offset: Duration,
}

impl ReplayPoint {
    fn sample_now(&self) -> LocationSample {
        LocationSample::new(self.latitude, self.longitude, self.accuracy, Utc::now())
    }
}

/// A recorded GPX track played back as a live location feed.
pub struct GpxReplay {
    points: Vec<ReplayPoint>,
}

impl GpxReplay {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader(reader: impl Read) -> anyhow::Result<Self> {
        let gpx = gpx::read(reader).context("failed to parse gpx")?;

        let mut first_time: Option<DateTime<Utc>> = None;
        let mut last_offset = Duration::ZERO;
        let mut points = Vec::new();

        for track in gpx.tracks {
            for segment in track.segments {
                for waypoint in segment.points {
                    // Untimed points reuse the previous offset.
                    let offset = match waypoint.time.map(|time| time.format()) {
                        Some(Ok(formatted)) => {
                            let time = DateTime::parse_from_rfc3339(&formatted)
                                .with_context(|| format!("bad gpx timestamp {formatted}"))?
                                .with_timezone(&Utc);
                            let first = *first_time.get_or_insert(time);
                            (time - first).to_std().unwrap_or(last_offset)
                        }
                        _ => last_offset,
                    };
                    last_offset = offset.max(last_offset);

                    let point = waypoint.point();
                    points.push(ReplayPoint {
                        latitude: point.y(),
                        longitude: point.x(),
                        accuracy: waypoint.hdop.map(|hdop| hdop * DEFAULT_ACCURACY_M).unwrap_or(DEFAULT_ACCURACY_M),
                        offset: last_offset,
                    });
                }
            }
        }

        if points.is_empty() {
            anyhow::bail!("gpx file has no track points");
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[ReplayPoint] {
        &self.points
    }

    pub fn first_sample(&self) -> Option<LocationSample> {
        self.points.first().map(ReplayPoint::sample_now)
    }

    /// Pushes every point into `location`, spaced like the recording divided
    /// by `speed`.
    pub async fn feed(self, location: ChannelLocationSource, speed: f64) {
        let speed = if speed > 0.0 { speed } else { 1.0 };
        let started = tokio::time::Instant::now();

        for point in &self.points {
            tokio::time::sleep_until(started + point.offset.div_f64(speed)).await;
            location.push(point.sample_now());
        }

        tracing::info!(points = self.points.len(), "replay finished");
    }
}
