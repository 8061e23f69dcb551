//! Process-wide engine context and launch options.
//!
//! Everything that would otherwise be a global (the frame clock, the seeded
//! RNG, render options' backing store, the diagnostic instance registry, the
//! abort-on-error switch) hangs off [`EngineContext`], which the host creates
//! at startup and threads through the top-level APIs.

use rand::rngs::SmallRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::errors::{GlintError, Result};
use crate::handle::InstanceRegistry;

/// Command-line options accepted by the host binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub autopilot: bool,
    pub fullscreen: bool,
    /// Exit after this many frames.
    pub exit_after: Option<u64>,
    pub restart: bool,
    /// Abort on any logged error; used by CI.
    pub abort_on_error: bool,
    pub server: Option<String>,
}

impl LaunchOptions {
    /// Parses the documented flags from an argument list (program name
    /// excluded). Unknown options and missing values fail with
    /// `invalid_arguments`.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut opts = LaunchOptions::default();
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            match arg.as_ref() {
                "--autopilot" | "-A" => opts.autopilot = true,
                "--fullscreen" | "-F" => opts.fullscreen = true,
                "--restart" | "-R" => opts.restart = true,
                "--aoe" | "-E" => opts.abort_on_error = true,
                "--exitafter" | "-e" => {
                    let value = iter
                        .next()
                        .ok_or(GlintError::InvalidArguments("--exitafter needs a frame count"))?;
                    opts.exit_after = Some(
                        value
                            .as_ref()
                            .parse()
                            .map_err(|_| GlintError::InvalidArguments("--exitafter frame count"))?,
                    );
                }
                "--server" | "-S" => {
                    let value = iter
                        .next()
                        .ok_or(GlintError::InvalidArguments("--server needs an address"))?;
                    opts.server = Some(value.as_ref().to_string());
                }
                _ => return Err(GlintError::InvalidArguments("unknown option")),
            }
        }

        Ok(opts)
    }
}

/// Persisted user settings. Load failures fall back to the baked defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub music_volume: f32,
    pub fullscreen: bool,
    pub rng_seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            music_volume: 1.0,
            fullscreen: false,
            rng_seed: 0x5eed,
        }
    }
}

impl Settings {
    /// Parses settings JSON, falling back to defaults on any error.
    #[must_use]
    pub fn from_json(text: &str) -> Self {
        match serde_json::from_str(text) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("settings unreadable ({err}), using defaults");
                Settings::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// The engine context. One per process, owned by the host.
pub struct EngineContext {
    options: LaunchOptions,
    settings: Settings,
    registry: InstanceRegistry,
    rng: SmallRng,
    time: f64,
    frame: u64,
}

impl EngineContext {
    #[must_use]
    pub fn new(options: LaunchOptions, settings: Settings) -> Self {
        let rng = SmallRng::seed_from_u64(settings.rng_seed);
        Self {
            options,
            settings,
            registry: InstanceRegistry::new(),
            rng,
            time: 0.0,
            frame: 0,
        }
    }

    #[must_use]
    pub fn options(&self) -> &LaunchOptions {
        &self.options
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Monotonic time in seconds since context creation.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.time
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Advances the frame clock. Called once per frame by the main loop.
    pub fn advance(&mut self, dt: f64) {
        self.time += dt;
        self.frame += 1;
    }

    /// Whether the main loop should stop because `--exitafter` elapsed.
    #[must_use]
    pub fn frame_budget_exhausted(&self) -> bool {
        self.options
            .exit_after
            .is_some_and(|budget| self.frame >= budget)
    }

    /// Uniform random float in `[0, 1)`, from the seeded stream.
    pub fn frand(&mut self) -> f32 {
        self.rng.random::<f32>()
    }

    /// Reports a recoverable error. Under `--aoe` every reported error is
    /// fatal so CI runs fail loudly instead of logging and limping on.
    pub fn report_error(&self, err: &GlintError) {
        if self.options.abort_on_error {
            panic!("abort on error: {err}");
        }
        log::warn!("{err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long_and_short_options() {
        let opts =
            LaunchOptions::parse(["--autopilot", "-e", "100", "--server", "10.0.0.1"]).unwrap();
        assert!(opts.autopilot);
        assert_eq!(opts.exit_after, Some(100));
        assert_eq!(opts.server.as_deref(), Some("10.0.0.1"));
        assert!(!opts.fullscreen);

        let short = LaunchOptions::parse(["-A", "-F", "-R", "-E"]).unwrap();
        assert!(short.autopilot && short.fullscreen && short.restart && short.abort_on_error);
    }

    #[test]
    fn test_parse_rejects_unknown_and_missing_value() {
        assert!(LaunchOptions::parse(["--frobnicate"]).is_err());
        assert!(LaunchOptions::parse(["--exitafter"]).is_err());
        assert!(LaunchOptions::parse(["-e", "many"]).is_err());
    }

    #[test]
    fn test_settings_fall_back_to_defaults() {
        let settings = Settings::from_json("{not json");
        assert_eq!(settings, Settings::default());

        let parsed = Settings::from_json(r#"{ "music_volume": 0.5 }"#);
        assert_eq!(parsed.music_volume, 0.5);
        assert_eq!(parsed.rng_seed, Settings::default().rng_seed);
    }

    #[test]
    fn test_exit_after_budget() {
        let opts = LaunchOptions::parse(["-e", "2"]).unwrap();
        let mut ctx = EngineContext::new(opts, Settings::default());
        assert!(!ctx.frame_budget_exhausted());
        ctx.advance(0.016);
        ctx.advance(0.016);
        assert!(ctx.frame_budget_exhausted());
    }
}
