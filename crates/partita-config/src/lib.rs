//! Settings files for the partita convolution reverb.
//!
//! A [`ConvolutionSettings`] file names an impulse response and holds every
//! live parameter plus the construction options of the effect, as TOML.
//!
//! # Example
//!
//! ```rust
//! use partita_config::ConvolutionSettings;
//!
//! let settings = ConvolutionSettings::from_toml(r#"
//!     name = "Chamber"
//!     impulse = "chamber.wav"
//!     dry_gain_db = 0.0
//!     wet_gain_db = -3.0
//!     predelay_ms = 15.0
//!
//!     [engine]
//!     worker_threads = 2
//! "#).unwrap();
//!
//! settings.validate().unwrap();
//! let options = settings.effect_options().unwrap();
//! assert_eq!(options.worker_threads, 2);
//! ```

pub mod error;
pub mod settings;
pub mod validation;

pub use error::ConfigError;
pub use settings::{
    ConvolutionSettings, EngineSettings, MAX_TAIL_SIZE, MAX_WORKER_THREADS, MIN_TAIL_SIZE,
};
pub use validation::{ValidationError, check_range};
