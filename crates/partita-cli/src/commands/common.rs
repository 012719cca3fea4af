//! Shared CLI helpers used across multiple commands.

use std::path::{Path, PathBuf};

use anyhow::Context;
use partita_config::ConvolutionSettings;

/// Load settings from `path`, or defaults when none is given. Also returns
/// the directory relative impulse paths resolve against.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<(ConvolutionSettings, PathBuf)> {
    match path {
        Some(path) => {
            let settings = ConvolutionSettings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?;
            let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
            Ok((settings, base))
        }
        None => Ok((ConvolutionSettings::default(), PathBuf::new())),
    }
}

/// Root mean square level.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Largest absolute sample.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0, f32::max)
}

/// Human-readable level, with digital silence shown as `-inf`.
pub fn format_db(linear: f32) -> String {
    if linear <= 0.0 {
        "-inf dB".to_string()
    } else {
        format!("{:.1} dB", partita_core::linear_to_db(linear))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_of_a_square_wave() {
        let square = [0.5, -0.5, 0.5, -0.5];
        assert!((rms(&square) - 0.5).abs() < 1e-6);
        assert_eq!(peak(&square), 0.5);
        assert_eq!(format_db(1.0), "0.0 dB");
        assert_eq!(format_db(0.0), "-inf dB");
    }

    #[test]
    fn no_settings_file_means_defaults() {
        let (settings, base) = load_settings(None).unwrap();
        assert_eq!(settings, ConvolutionSettings::default());
        assert_eq!(base, PathBuf::new());
    }
}
