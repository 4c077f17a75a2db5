//! Host configuration surface: envelope timings, wave type, master clock
//! and portamento, stored as JSON under the platform config directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::envelope::{EnvelopeSpec, Stage};
use crate::core::registers::{WaveType, DEFAULT_MASTER_CLOCK_HZ};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    NegativeDuration { stage: &'static str, value: f32 },
    NoConfigDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config I/O error: {err}"),
            ConfigError::Parse(err) => write!(f, "config parse error: {err}"),
            ConfigError::NegativeDuration { stage, value } => {
                write!(f, "negative {stage} duration: {value}")
            }
            ConfigError::NoConfigDir => write!(f, "could not determine config directory"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Everything the host exposes for tweaking: the core itself takes no
/// flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub wave_type: WaveType,
    pub master_clock_hz: u32,
    pub portamento: bool,
    pub attack: Stage,
    pub decay: Stage,
    pub sustain: Stage,
    pub release: Stage,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wave_type: WaveType::Triangle,
            master_clock_hz: DEFAULT_MASTER_CLOCK_HZ,
            portamento: false,
            attack: Stage::new(1.0, 0.10),
            decay: Stage::new(0.8, 0.05),
            sustain: Stage::new(0.8, 0.05),
            release: Stage::new(0.0, 0.10),
        }
    }
}

impl VoiceConfig {
    /// Levels clamp on use; durations must not be negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, stage) in [
            ("attack", &self.attack),
            ("decay", &self.decay),
            ("sustain", &self.sustain),
            ("release", &self.release),
        ] {
            if stage.duration_secs < 0.0 {
                return Err(ConfigError::NegativeDuration {
                    stage: name,
                    value: stage.duration_secs,
                });
            }
        }
        Ok(())
    }

    pub fn envelope_spec(&self) -> EnvelopeSpec {
        EnvelopeSpec {
            attack: Stage::new(self.attack.level, self.attack.duration_secs),
            decay: Stage::new(self.decay.level, self.decay.duration_secs),
            sustain: Stage::new(self.sustain.level, self.sustain.duration_secs),
            release: Stage::new(self.release.level, self.release.duration_secs),
            portamento: self.portamento,
        }
    }

    /// Default location: `<config dir>/ad9833-voice/voice.json`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("ad9833-voice").join("voice.json"))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: VoiceConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load the file at `path`, writing the defaults there on first run.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            debug!("loading config from {}", path.display());
            Self::load_from_file(path)
        } else {
            debug!("writing default config to {}", path.display());
            let config = Self::default();
            config.save_to_file(path)?;
            Ok(config)
        }
    }
}
