//! tactus-services: Live input, config hand-over and persistence around the rhythm engine

pub mod audio_input;
pub mod config_store;
pub mod monitor;
pub mod service;
pub mod snapshot;

pub use audio_input::{AudioInputError, AudioInputService, DEFAULT_DEVICE, InputDevice, InputStreamHandle, OpenedInput};
pub use config_store::{ConfigStore, ConfigStoreError};
pub use monitor::EngineMonitor;
pub use service::{DEFAULT_BLOCK_SIZE, EngineProcessor, RhythmService, ServiceError};
pub use snapshot::{SnapshotReader, SnapshotWriter, snapshot_channel};
