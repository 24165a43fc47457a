use activity_tracker_lib::{api::GpsPoint, location_sample::LocationSample};

/// A captured sample waiting for upload, with the number of flushes it has
/// already been part of without success.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedSample {
    pub sample: LocationSample,
    pub failed_attempts: u32,
}

/// FIFO of samples awaiting transmission.
///
/// Single writer (the location stream) and single drainer (the uplink). Both
/// run through the controller's `&mut self`, so a drain can never interleave
/// with an append.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<BufferedSample>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: LocationSample) {
        self.samples.push(BufferedSample {
            sample,
            failed_attempts: 0,
        });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &LocationSample> {
        self.samples.iter().map(|buffered| &buffered.sample)
    }

    /// Takes everything currently buffered as one batch and leaves the buffer
    /// empty.
    pub fn take_batch(&mut self) -> Batch {
        Batch {
            entries: std::mem::take(&mut self.samples),
        }
    }

    /// Puts a failed batch back in front of anything appended since it was
    /// taken, so capture order is preserved.
    pub fn requeue_front(&mut self, mut batch: Batch) {
        batch.entries.append(&mut self.samples);
        self.samples = batch.entries;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Point-in-time snapshot of the buffer, in capture order.
#[derive(Debug, Default, PartialEq)]
pub struct Batch {
    entries: Vec<BufferedSample>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &LocationSample> {
        self.entries.iter().map(|buffered| &buffered.sample)
    }

    pub fn to_wire(&self) -> Vec<GpsPoint> {
        self.samples().map(LocationSample::to_wire).collect()
    }

    /// Counts one more failed attempt against every entry and splits off the
    /// ones that reached `max_attempts`. Older entries have failed at least as
    /// often as newer ones, so the exhausted entries always form a prefix.
    pub(crate) fn record_failure(&mut self, max_attempts: u32) -> usize {
        for entry in self.entries.iter_mut() {
            entry.failed_attempts += 1;
        }
        let exhausted = self.entries.iter().take_while(|entry| entry.failed_attempts >= max_attempts).count();
        self.entries.drain(..exhausted);
        exhausted
    }
}
