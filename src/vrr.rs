//! Variable-refresh-rate display parameters and low-framerate-compensation
//! tracking.
//!
//! A [`VrrConfig`] is an immutable description of one display's VRR window,
//! produced by whatever discovery path the host has (DRM properties, driver
//! query, compositor protocol, or manual entry). Everything derived from it
//! here is a pure function; [`LfcState`] is the one piece of mutable state,
//! stepped once per real frame.

use log::debug;

/// Where the VRR description came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VrrSource {
    Drm,
    Nvidia,
    Wayland,
    Manual,
    #[default]
    None,
}

/// One display's VRR window.
#[derive(Debug, Clone, Default)]
pub struct VrrConfig {
    pub min_hz: u32,
    pub max_hz: u32,
    /// The display re-presents frames itself below `min_hz`.
    pub lfc_supported: bool,
    pub source: VrrSource,
    pub enabled: bool,
    pub display_name: Option<String>,
}

impl VrrConfig {
    /// A manually entered config, e.g. from a host settings file.
    pub fn manual(min_hz: u32, max_hz: u32, lfc_supported: bool) -> Self {
        Self {
            min_hz,
            max_hz,
            lfc_supported,
            source: VrrSource::Manual,
            enabled: true,
            display_name: None,
        }
    }

    /// `min_hz <= max_hz`, both positive whenever a source is set.
    pub fn is_valid(&self) -> bool {
        self.source == VrrSource::None || (self.min_hz > 0 && self.min_hz <= self.max_hz)
    }

    /// Shortest supported present-to-present interval.
    pub fn min_interval_us(&self) -> u64 {
        if self.max_hz == 0 {
            0
        } else {
            1_000_000 / self.max_hz as u64
        }
    }

    /// Longest supported present-to-present interval.
    pub fn max_interval_us(&self) -> u64 {
        if self.min_hz == 0 {
            0
        } else {
            1_000_000 / self.min_hz as u64
        }
    }

    pub fn is_in_range(&self, fps: f32) -> bool {
        fps >= self.min_hz as f32 && fps <= self.max_hz as f32
    }

    /// Lowest source rate the display can track, counting LFC doubling.
    pub fn effective_min_hz(&self) -> f32 {
        if self.lfc_supported {
            self.min_hz as f32 / 2.0
        } else {
            self.min_hz as f32
        }
    }

    /// The driver is doubling frames at this source rate.
    pub fn is_lfc_active(&self, fps: f32) -> bool {
        self.lfc_supported && fps < self.min_hz as f32
    }

    /// Delay before an injected frame, halving the observed frame time and
    /// clamping into the display's half-interval window.
    pub fn calculate_injection_interval(&self, avg_frame_time_us: u64) -> u64 {
        let lo = self.min_interval_us() / 2;
        let hi = (self.max_interval_us() / 2).max(lo);
        (avg_frame_time_us / 2).clamp(lo, hi)
    }
}

/// Low-framerate-compensation tracking, stepped once per real frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct LfcState {
    pub active: bool,
    /// Frame number of the most recent activation or deactivation.
    pub transition_frame: u64,
    /// Real frames observed while LFC was active.
    pub doubled_frames: u64,
}

impl LfcState {
    pub fn update(&mut self, fps: f32, config: &VrrConfig, frame_number: u64) {
        let lfc_active = config.is_lfc_active(fps);
        if lfc_active != self.active {
            self.active = lfc_active;
            self.transition_frame = frame_number;
            debug!(
                "LFC {} at frame {frame_number} ({fps:.1} fps)",
                if lfc_active { "entered" } else { "left" }
            );
        }
        if self.active {
            self.doubled_frames += 1;
        }
    }

    /// Injection must stop while the display driver is doubling frames.
    pub fn should_pause_injection(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaming_display() -> VrrConfig {
        VrrConfig::manual(48, 144, true)
    }

    #[test]
    fn interval_derivations() {
        let config = gaming_display();
        assert!(config.is_valid());
        assert_eq!(config.min_interval_us(), 6_944);
        assert_eq!(config.max_interval_us(), 20_833);
        assert_eq!(config.effective_min_hz(), 24.0);

        let no_lfc = VrrConfig::manual(48, 144, false);
        assert_eq!(no_lfc.effective_min_hz(), 48.0);
    }

    #[test]
    fn range_and_lfc_predicates() {
        let config = gaming_display();
        assert!(config.is_in_range(48.0));
        assert!(config.is_in_range(144.0));
        assert!(!config.is_in_range(47.0));
        assert!(!config.is_in_range(145.0));

        assert!(config.is_lfc_active(47.9));
        assert!(!config.is_lfc_active(48.0));

        let no_lfc = VrrConfig::manual(48, 144, false);
        assert!(!no_lfc.is_lfc_active(30.0));
    }

    #[test]
    fn empty_config_is_valid_and_inert() {
        let config = VrrConfig::default();
        assert!(config.is_valid());
        assert_eq!(config.min_interval_us(), 0);
        assert_eq!(config.max_interval_us(), 0);
        assert!(!config.is_lfc_active(10.0));
    }

    #[test]
    fn invalid_window_detected() {
        let config = VrrConfig::manual(144, 48, false);
        assert!(!config.is_valid());
    }

    #[test]
    fn injection_interval_clamps() {
        let config = gaming_display();
        assert_eq!(config.calculate_injection_interval(16_667), 8_333);
        assert!(config.calculate_injection_interval(33_333) <= config.max_interval_us() / 2);
        assert!(config.calculate_injection_interval(1_000) >= config.min_interval_us() / 2);
        assert_eq!(
            config.calculate_injection_interval(1_000),
            config.min_interval_us() / 2
        );
    }

    #[test]
    fn injection_interval_is_monotone() {
        let config = gaming_display();
        let mut last = 0;
        for avg in (0..60_000).step_by(500) {
            let interval = config.calculate_injection_interval(avg);
            assert!(interval >= last);
            last = interval;
        }
    }

    #[test]
    fn lfc_transitions() {
        let config = gaming_display();
        let mut state = LfcState::default();

        state.update(60.0, &config, 0);
        assert!(!state.active);
        assert!(!state.should_pause_injection());

        state.update(30.0, &config, 1);
        assert!(state.active);
        assert!(state.should_pause_injection());
        assert_eq!(state.transition_frame, 1);
        assert_eq!(state.doubled_frames, 1);

        state.update(35.0, &config, 2);
        assert!(state.active);
        assert_eq!(state.transition_frame, 1);
        assert_eq!(state.doubled_frames, 2);

        state.update(60.0, &config, 3);
        assert!(!state.active);
        assert_eq!(state.transition_frame, 3);
        assert_eq!(state.doubled_frames, 2);
    }
}
