//! Settings file format and operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use partita_convolution::{
    ConvolutionHandle, DEFAULT_LATE_JOB_TIMEOUT, DEFAULT_MAX_TAIL_SIZE, DEFAULT_SWAP_TIMEOUT,
    EffectOptions, FftImplementation, MAX_GAIN_DB, MAX_HI_CUT_HZ, MAX_PREDELAY_MS, MIN_GAIN_DB,
    MIN_HI_CUT_HZ,
};

use crate::error::ConfigError;
use crate::validation::{ValidationError, check_range};

/// Smallest accepted `max_tail_size`.
pub const MIN_TAIL_SIZE: usize = 64;
/// Largest accepted `max_tail_size`.
pub const MAX_TAIL_SIZE: usize = 1 << 20;
/// Most pool workers a settings file may ask for.
pub const MAX_WORKER_THREADS: usize = 16;

/// Everything needed to recreate a convolution reverb: the impulse file,
/// the live parameters and the engine options.
///
/// # TOML Format
///
/// ```toml
/// name = "Plate"
/// impulse = "impulses/plate.wav"
/// dry_gain_db = 0.0
/// wet_gain_db = -6.0
/// damping_db = -30.0
/// hi_cut_hz = 8000.0
/// predelay_ms = 12.0
///
/// [engine]
/// fft = "real"
/// worker_threads = 2
/// ```
///
/// Missing keys take their defaults, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvolutionSettings {
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Impulse response file. Relative paths resolve against the settings
    /// file's directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impulse: Option<PathBuf>,
    /// Dry level in dB.
    pub dry_gain_db: f32,
    /// Wet level in dB.
    pub wet_gain_db: f32,
    /// Level the impulse decays towards, in dB.
    pub damping_db: f32,
    /// Damping cutoff in Hz.
    pub hi_cut_hz: f32,
    /// Wet predelay in milliseconds.
    pub predelay_ms: f32,
    /// Wet path enabled.
    pub gate: bool,
    /// Run large tail partitions on the background pool.
    pub multithread: bool,
    /// Construction-time options.
    pub engine: EngineSettings,
}

impl Default for ConvolutionSettings {
    fn default() -> Self {
        Self {
            name: None,
            impulse: None,
            dry_gain_db: MIN_GAIN_DB,
            wet_gain_db: 0.0,
            damping_db: 0.0,
            hi_cut_hz: MAX_HI_CUT_HZ,
            predelay_ms: 0.0,
            gate: true,
            multithread: true,
            engine: EngineSettings::default(),
        }
    }
}

/// The `[engine]` table: options fixed when the effect is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// FFT backend name: `portable`, `real` or `best`.
    pub fft: String,
    /// Largest tail partition size.
    pub max_tail_size: usize,
    /// Background pool workers. Zero keeps all work on the audio thread.
    pub worker_threads: usize,
    /// How long a block may wait for a background tail job, in ms.
    pub late_job_timeout_ms: f64,
    /// Bound on reload waits, in ms.
    pub swap_timeout_ms: f64,
    /// Run parameter-triggered reloads on a worker thread.
    pub async_reload: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let options = EffectOptions::default();
        Self {
            fft: options.fft.name().to_string(),
            max_tail_size: DEFAULT_MAX_TAIL_SIZE,
            worker_threads: options.worker_threads,
            late_job_timeout_ms: DEFAULT_LATE_JOB_TIMEOUT.as_secs_f64() * 1000.0,
            swap_timeout_ms: DEFAULT_SWAP_TIMEOUT.as_secs_f64() * 1000.0,
            async_reload: options.async_reload,
        }
    }
}

impl ConvolutionSettings {
    /// Create default settings with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the impulse file.
    pub fn with_impulse(mut self, path: impl Into<PathBuf>) -> Self {
        self.impulse = Some(path.into());
        self
    }

    /// Capture the live parameters of a running effect. Engine options come
    /// from the effect too; name and impulse stay unset.
    pub fn from_handle(handle: &ConvolutionHandle) -> Self {
        let options = handle.options();
        Self {
            name: None,
            impulse: None,
            dry_gain_db: handle.dry_gain_db(),
            wet_gain_db: handle.wet_gain_db(),
            damping_db: handle.damping(),
            hi_cut_hz: handle.hi_cut(),
            predelay_ms: handle.predelay(),
            gate: handle.gate(),
            multithread: handle.multithread(),
            engine: EngineSettings {
                fft: options.fft.name().to_string(),
                max_tail_size: options.max_tail_size,
                worker_threads: options.worker_threads,
                late_job_timeout_ms: options.late_job_timeout.as_secs_f64() * 1000.0,
                swap_timeout_ms: options.swap_timeout.as_secs_f64() * 1000.0,
                async_reload: options.async_reload,
            },
        }
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let settings = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Parse settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save settings to a TOML file, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Serialize settings to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The impulse path, resolved against `base_dir` when relative.
    pub fn impulse_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.impulse.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                base_dir.join(p)
            }
        })
    }

    /// Check every value, reporting all failures at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let gain = (f64::from(MIN_GAIN_DB), f64::from(MAX_GAIN_DB));
        let e = &self.engine;
        let checks = [
            check_range("dry_gain_db", f64::from(self.dry_gain_db), gain.0, gain.1),
            check_range("wet_gain_db", f64::from(self.wet_gain_db), gain.0, gain.1),
            check_range("damping_db", f64::from(self.damping_db), gain.0, 0.0),
            check_range(
                "hi_cut_hz",
                f64::from(self.hi_cut_hz),
                f64::from(MIN_HI_CUT_HZ),
                f64::from(MAX_HI_CUT_HZ),
            ),
            check_range("predelay_ms", f64::from(self.predelay_ms), 0.0, f64::from(MAX_PREDELAY_MS)),
            check_range(
                "engine.max_tail_size",
                e.max_tail_size as f64,
                MIN_TAIL_SIZE as f64,
                MAX_TAIL_SIZE as f64,
            ),
            check_range(
                "engine.worker_threads",
                e.worker_threads as f64,
                0.0,
                MAX_WORKER_THREADS as f64,
            ),
            check_range("engine.late_job_timeout_ms", e.late_job_timeout_ms, 0.0, 1000.0),
            check_range("engine.swap_timeout_ms", e.swap_timeout_ms, 1.0, 60_000.0),
        ];

        let mut errors: Vec<ValidationError> = checks.into_iter().filter_map(Result::err).collect();
        if FftImplementation::from_name(&e.fft).is_none() {
            errors.push(ValidationError::InvalidFormat {
                param: "engine.fft".to_string(),
                reason: format!("unknown backend '{}', expected portable, real or best", e.fft),
            });
        }
        ValidationError::from_list(errors)
    }

    /// Options for constructing an effect from these settings.
    pub fn effect_options(&self) -> Result<EffectOptions, ConfigError> {
        self.validate()?;
        let e = &self.engine;
        let fft = FftImplementation::from_name(&e.fft).unwrap_or_default();
        Ok(EffectOptions {
            fft,
            max_tail_size: e.max_tail_size,
            worker_threads: e.worker_threads,
            late_job_timeout: Duration::from_secs_f64(e.late_job_timeout_ms / 1000.0),
            swap_timeout: Duration::from_secs_f64(e.swap_timeout_ms / 1000.0),
            async_reload: e.async_reload,
        })
    }

    /// Push the live parameters to a running effect. Damping and hi-cut
    /// changes trigger a reload on the effect's usual path.
    pub fn apply(&self, handle: &ConvolutionHandle) -> Result<(), ConfigError> {
        self.validate()?;
        handle.set_dry_gain_db(self.dry_gain_db);
        handle.set_wet_gain_db(self.wet_gain_db);
        handle.set_predelay(self.predelay_ms);
        handle.set_gate(self.gate);
        handle.set_multithread(self.multithread);
        handle.set_damping(self.damping_db)?;
        handle.set_hi_cut(self.hi_cut_hz)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings = ConvolutionSettings::from_toml("").unwrap();
        assert_eq!(settings, ConvolutionSettings::default());
        assert_eq!(settings.dry_gain_db, -100.0);
        assert_eq!(settings.engine.fft, "best");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn partial_engine_table_keeps_other_defaults() {
        let settings = ConvolutionSettings::from_toml(
            r#"
            wet_gain_db = -6.0
            [engine]
            worker_threads = 3
            "#,
        )
        .unwrap();
        assert_eq!(settings.wet_gain_db, -6.0);
        assert_eq!(settings.engine.worker_threads, 3);
        assert_eq!(settings.engine.max_tail_size, DEFAULT_MAX_TAIL_SIZE);
        assert!(settings.engine.async_reload);
    }

    #[test]
    fn toml_round_trip_preserves_values() {
        let mut settings = ConvolutionSettings::new("Plate").with_impulse("plate.wav");
        settings.hi_cut_hz = 6000.0;
        settings.engine.fft = "portable".to_string();

        let text = settings.to_toml().unwrap();
        assert!(text.contains("[engine]"));
        assert_eq!(ConvolutionSettings::from_toml(&text).unwrap(), settings);
    }

    #[test]
    fn validation_reports_every_failure() {
        let mut settings = ConvolutionSettings::default();
        settings.wet_gain_db = 40.0;
        settings.damping_db = 3.0;
        settings.engine.fft = "fastest".to_string();

        let err = settings.validate().unwrap_err();
        let params: Vec<String> = err
            .flatten()
            .into_iter()
            .map(|e| match e {
                ValidationError::OutOfRange { param, .. }
                | ValidationError::InvalidFormat { param, .. } => param.clone(),
                ValidationError::Multiple(_) => String::new(),
            })
            .collect();
        assert_eq!(params, ["wet_gain_db", "damping_db", "engine.fft"]);
    }

    #[test]
    fn effect_options_convert_durations() {
        let mut settings = ConvolutionSettings::default();
        settings.engine.late_job_timeout_ms = 3.5;
        settings.engine.swap_timeout_ms = 250.0;
        settings.engine.fft = "real".to_string();

        let options = settings.effect_options().unwrap();
        assert!((options.late_job_timeout.as_secs_f64() - 0.0035).abs() < 1e-9);
        assert_eq!(options.swap_timeout, Duration::from_millis(250));
        assert_eq!(options.fft, FftImplementation::RealValued);
    }

    #[test]
    fn effect_options_reject_invalid_settings() {
        let mut settings = ConvolutionSettings::default();
        settings.engine.max_tail_size = 8;
        assert!(matches!(settings.effect_options(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn relative_impulse_resolves_against_base() {
        let settings = ConvolutionSettings::default().with_impulse("irs/hall.wav");
        let base = Path::new("/presets");
        assert_eq!(settings.impulse_path(base).unwrap(), Path::new("/presets/irs/hall.wav"));
        assert!(ConvolutionSettings::default().impulse_path(base).is_none());
    }
}
