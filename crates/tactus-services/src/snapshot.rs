//! Single-writer, single-reader hand-over of engine configuration
//!
//! The control thread publishes whole [`EngineConfig`] snapshots; the audio
//! thread picks up the newest one at the start of a block. Replaced snapshots
//! travel back to the control thread so they are never freed on the audio thread.

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use tactus_core::EngineConfig;
use tracing::{debug, warn};

/// Retired snapshots the reader can hand back before the writer collects them
const RETURN_SLOTS: usize = 16;

pub fn snapshot_channel(initial: EngineConfig) -> (SnapshotWriter, SnapshotReader) {
    let (tx, rx) = bounded::<Box<EngineConfig>>(1);
    let (retired_tx, retired_rx) = bounded::<Box<EngineConfig>>(RETURN_SLOTS);
    let writer = SnapshotWriter {
        tx,
        pending: rx.clone(),
        retired: retired_rx,
    };
    let reader = SnapshotReader {
        rx,
        retired: retired_tx,
        current: Box::new(initial),
    };
    (writer, reader)
}

/// Control-side end
pub struct SnapshotWriter {
    tx: Sender<Box<EngineConfig>>,
    /// Same queue as the reader, used to discard a snapshot it has not taken yet
    pending: Receiver<Box<EngineConfig>>,
    retired: Receiver<Box<EngineConfig>>,
}

impl SnapshotWriter {
    /// Publish a snapshot. Returns false if the reader is gone.
    ///
    /// Fields the engine will ignore are logged here; the audio side keeps
    /// its current value for each of them.
    pub fn publish(&self, config: &EngineConfig) -> bool {
        self.collect_retired();
        // The writer keeps its own receiver on the queue, so reader loss shows on the return path
        if let Err(TryRecvError::Disconnected) = self.retired.try_recv() {
            return false;
        }
        config.warn_rejected();
        let snapshot = Box::new(config.clone());

        if self.pending.try_recv().is_ok() {
            debug!("Replacing unconsumed config snapshot");
        }
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Config snapshot queue full, snapshot dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drop snapshots the reader has replaced. Returns how many were freed.
    pub fn collect_retired(&self) -> usize {
        self.retired.try_iter().count()
    }
}

/// Audio-side end
pub struct SnapshotReader {
    rx: Receiver<Box<EngineConfig>>,
    retired: Sender<Box<EngineConfig>>,
    current: Box<EngineConfig>,
}

impl SnapshotReader {
    /// Take the newest snapshot if one arrived since the last poll. Never blocks.
    pub fn poll(&mut self) -> Option<&EngineConfig> {
        let next = self.rx.try_recv().ok()?;
        let old = std::mem::replace(&mut self.current, next);
        // If the writer is not collecting, the old snapshot is freed here instead
        let _ = self.retired.try_send(old);
        Some(&self.current)
    }

    pub fn current(&self) -> &EngineConfig {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(bpm: f64) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.tempo.bpm = bpm;
        config
    }

    #[test]
    fn test_poll_without_publish_is_empty() {
        let (_writer, mut reader) = snapshot_channel(config(90.0));
        assert!(reader.poll().is_none());
        assert_eq!(reader.current().tempo.bpm, 90.0);
    }

    #[test]
    fn test_reader_sees_newest_snapshot() {
        let (writer, mut reader) = snapshot_channel(config(90.0));
        assert!(writer.publish(&config(100.0)));
        assert!(writer.publish(&config(110.0)));

        assert_eq!(reader.poll().map(|c| c.tempo.bpm), Some(110.0));
        assert!(reader.poll().is_none());
        assert_eq!(reader.current().tempo.bpm, 110.0);
    }

    #[test]
    fn test_replaced_snapshots_return_to_writer() {
        let (writer, mut reader) = snapshot_channel(config(90.0));
        writer.publish(&config(100.0));
        reader.poll();
        // Collects the initial snapshot on the way
        writer.publish(&config(120.0));
        reader.poll();
        assert_eq!(writer.collect_retired(), 1);
        assert_eq!(writer.collect_retired(), 0);
    }

    #[test]
    fn test_rejected_fields_reach_reader_unchanged() {
        let (writer, mut reader) = snapshot_channel(config(90.0));
        let mut bad = config(100.0);
        bad.detector.on_beat_bias = 1.5;
        assert!(writer.publish(&bad));
        // Not replaced by a default; the engine setters skip it
        assert_eq!(reader.poll().map(|c| c.detector.on_beat_bias), Some(1.5));
    }

    #[test]
    fn test_publish_fails_once_reader_dropped() {
        let (writer, reader) = snapshot_channel(config(90.0));
        drop(reader);
        assert!(!writer.publish(&config(100.0)));
    }
}
