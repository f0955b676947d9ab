use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tactus_core::Preset;
use tactus_services::{DEFAULT_BLOCK_SIZE, DEFAULT_DEVICE};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Onset-driven adaptive drum sequencer")]
pub struct Args {
    /// List audio input devices and exit
    #[arg(long, default_value_t = false)]
    pub list_devices: bool,

    /// Input device name, or "default"
    #[arg(long, default_value = DEFAULT_DEVICE)]
    pub device: String,

    /// Path to config TOML (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the resolved config (including preset tracks) to the config path and exit
    #[arg(long, default_value_t = false)]
    pub save_config: bool,

    /// Analyse a WAV file offline instead of listening live
    #[arg(long)]
    pub wav: Option<PathBuf>,

    /// Samples per engine block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Stop a live run after this many seconds
    #[arg(long)]
    pub seconds: Option<f64>,

    /// Track mesh to run
    #[arg(long, value_enum, default_value_t = PresetArg::DrumMesh)]
    pub preset: PresetArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetArg {
    DrumMesh,
    TriggersOnly,
}

impl From<PresetArg> for Preset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::DrumMesh => Preset::DrumMesh,
            PresetArg::TriggersOnly => Preset::TriggersOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_offline_run() {
        let args = Args::parse_from(["tactus", "--wav", "take.wav", "--block-size", "256", "--preset", "triggers-only"]);
        assert_eq!(args.wav, Some(PathBuf::from("take.wav")));
        assert_eq!(args.block_size, 256);
        assert_eq!(Preset::from(args.preset), Preset::TriggersOnly);
        assert_eq!(args.device, DEFAULT_DEVICE);
        assert!(!args.save_config);
    }
}
