//! Present injection: deciding when a synthesized frame enters the present
//! sequence.
//!
//! The injection context sits at the layer level, between the application's
//! presents. It observes real present-to-present intervals, tracks LFC, and
//! answers two questions per frame: *should* a generated frame be injected
//! right now, and *when* relative to the last real present.
//!
//! It borrows the frame-generation orchestrator and (optionally) the
//! low-latency context through weak references; it never owns or disposes
//! of either.

use std::sync::{Mutex, Weak};
use std::time::Instant;

use log::{debug, info};

use crate::frame_generation::FrameGenContext;
use crate::low_latency::SharedLowLatencyContext;
use crate::vrr::{LfcState, VrrConfig};

/// Vulkan layer name the injection layer registers under.
pub const LAYER_NAME: &str = "VK_LAYER_NVX_frame_injection";

/// Entry-point names the layer manifest maps proc-addr resolution to.
pub const INSTANCE_PROC_ADDR_ENTRY_POINT: &str = "nvx_get_instance_proc_addr";
pub const DEVICE_PROC_ADDR_ENTRY_POINT: &str = "nvx_get_device_proc_addr";

/// Slots in the present-interval ring.
pub const PRESENT_INTERVAL_SLOTS: usize = 16;

/// Half of an 8.3 ms frame: the adaptive fallback when no intervals have
/// been observed yet (~120 Hz midpoint).
const ADAPTIVE_FALLBACK_US: u64 = 8_333;

/// How many frames are injected per real frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionMode {
    #[default]
    Disabled,
    /// One generated frame between consecutive real frames.
    Single,
    /// Two generated frames between consecutive real frames.
    Double,
}

/// How the injection instant is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InjectionTiming {
    /// Half the configured target frame time.
    Fixed,
    /// Half the observed average present interval.
    #[default]
    Adaptive,
    /// Delegated to the display's VRR window.
    Vrr,
}

/// Injection configuration.
#[derive(Debug, Clone)]
pub struct PresentConfig {
    pub mode: InjectionMode,
    pub timing: InjectionTiming,
    pub target_fps: u32,
    /// Generated frames scoring below this are not injected.
    pub min_confidence: f32,
    /// Coordinate injected presents with the low-latency runtime.
    pub reflex_integration: bool,
    pub vrr: Option<VrrConfig>,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            mode: InjectionMode::Single,
            timing: InjectionTiming::Adaptive,
            target_fps: 60,
            min_confidence: 0.5,
            reflex_integration: true,
            vrr: None,
        }
    }
}

/// Counters exposed for overlays and logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectionStats {
    pub real_frames: u64,
    pub generated_frames: u64,
    pub skipped_frames: u64,
    pub avg_present_interval_us: u64,
    pub effective_fps: f32,
}

/// Per-swapchain present-injection state.
pub struct PresentInjectionContext {
    config: PresentConfig,
    enabled: bool,
    frame_gen: Weak<Mutex<FrameGenContext>>,
    low_latency: Option<Weak<SharedLowLatencyContext>>,
    epoch: Instant,
    intervals: [u64; PRESENT_INTERVAL_SLOTS],
    interval_cursor: usize,
    avg_present_interval_us: u64,
    effective_fps: f32,
    last_present_time_us: Option<u64>,
    frame_number: u64,
    real_frames: u64,
    generated_frames: u64,
    skipped_frames: u64,
    lfc: LfcState,
}

impl PresentInjectionContext {
    pub fn new(
        config: PresentConfig,
        frame_gen: Weak<Mutex<FrameGenContext>>,
        low_latency: Option<Weak<SharedLowLatencyContext>>,
    ) -> Self {
        let enabled = config.mode != InjectionMode::Disabled;
        Self {
            config,
            enabled,
            frame_gen,
            low_latency,
            epoch: Instant::now(),
            intervals: [0; PRESENT_INTERVAL_SLOTS],
            interval_cursor: 0,
            avg_present_interval_us: 0,
            effective_fps: 0.0,
            last_present_time_us: None,
            frame_number: 0,
            real_frames: 0,
            generated_frames: 0,
            skipped_frames: 0,
            lfc: LfcState::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled && self.config.mode != InjectionMode::Disabled;
    }

    pub fn set_mode(&mut self, mode: InjectionMode) {
        self.config.mode = mode;
        if mode == InjectionMode::Disabled {
            self.enabled = false;
        }
    }

    /// Installs the display's VRR window. An enabled config upgrades
    /// adaptive timing to VRR timing.
    pub fn set_vrr_config(&mut self, vrr: VrrConfig) {
        if self.config.timing == InjectionTiming::Adaptive && vrr.enabled {
            info!("VRR config installed, switching injection timing to VRR");
            self.config.timing = InjectionTiming::Vrr;
        }
        self.config.vrr = Some(vrr);
    }

    pub fn config(&self) -> &PresentConfig {
        &self.config
    }

    /// Whether a generated frame should be injected right now: enabled, LFC
    /// not pausing us, the orchestrator's confidence at or above the floor,
    /// and no scene change on the last real frame.
    pub fn should_inject(&self) -> bool {
        if !self.enabled || self.lfc.should_pause_injection() {
            return false;
        }
        let Some(frame_gen) = self.frame_gen.upgrade() else {
            return false;
        };
        let stats = match frame_gen.lock() {
            Ok(frame_gen) => frame_gen.stats(),
            Err(_) => return false,
        };
        stats.confidence >= self.config.min_confidence && !stats.scene_change_detected
    }

    /// Microseconds after the last real present at which to inject.
    pub fn calculate_injection_timing(&self) -> u64 {
        match self.config.timing {
            InjectionTiming::Fixed => {
                if self.config.target_fps == 0 {
                    ADAPTIVE_FALLBACK_US
                } else {
                    1_000_000 / self.config.target_fps as u64 / 2
                }
            }
            InjectionTiming::Adaptive => {
                if self.avg_present_interval_us == 0 {
                    ADAPTIVE_FALLBACK_US
                } else {
                    self.avg_present_interval_us / 2
                }
            }
            InjectionTiming::Vrr => match &self.config.vrr {
                Some(vrr) => vrr.calculate_injection_interval(self.avg_present_interval_us),
                None => ADAPTIVE_FALLBACK_US,
            },
        }
    }

    /// Records a present at the current monotonic instant.
    pub fn record_present_time(&mut self, is_generated: bool) {
        let now_us = self.epoch.elapsed().as_micros() as u64;
        self.record_present_time_at(now_us, is_generated);
    }

    /// Records a present at an explicit monotonic timestamp. Real frames
    /// advance the frame number and step LFC at the current effective FPS.
    pub fn record_present_time_at(&mut self, now_us: u64, is_generated: bool) {
        if let Some(last) = self.last_present_time_us {
            let interval = now_us.saturating_sub(last);
            self.intervals[self.interval_cursor] = interval;
            self.interval_cursor = (self.interval_cursor + 1) % PRESENT_INTERVAL_SLOTS;
            self.recompute_average();
        }
        self.last_present_time_us = Some(now_us);

        if is_generated {
            self.generated_frames += 1;
        } else {
            self.real_frames += 1;
            self.frame_number += 1;
            if let Some(vrr) = self.config.vrr.clone() {
                self.lfc.update(self.effective_fps, &vrr, self.frame_number);
            }
        }
    }

    /// Counts a frame the injector decided not to present.
    pub fn record_skipped(&mut self) {
        self.skipped_frames += 1;
        debug!("injection skipped ({} total)", self.skipped_frames);
    }

    fn recompute_average(&mut self) {
        // Zero slots are ring positions never written; they carry no sample.
        let mut sum = 0u64;
        let mut count = 0u64;
        for &interval in &self.intervals {
            if interval != 0 {
                sum += interval;
                count += 1;
            }
        }
        self.avg_present_interval_us = if count == 0 { 0 } else { sum / count };
        self.effective_fps = if self.avg_present_interval_us == 0 {
            0.0
        } else {
            1_000_000.0 / self.avg_present_interval_us as f32
        };
    }

    pub fn stats(&self) -> InjectionStats {
        InjectionStats {
            real_frames: self.real_frames,
            generated_frames: self.generated_frames,
            skipped_frames: self.skipped_frames,
            avg_present_interval_us: self.avg_present_interval_us,
            effective_fps: self.effective_fps,
        }
    }

    pub fn lfc_state(&self) -> LfcState {
        self.lfc
    }

    pub fn effective_fps(&self) -> f32 {
        self.effective_fps
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// True while reflex-coordinated injection has a live low-latency
    /// context to consult.
    pub fn has_low_latency_link(&self) -> bool {
        self.config.reflex_integration
            && self
                .low_latency
                .as_ref()
                .is_some_and(|weak| weak.upgrade().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_generation::{FrameGenConfig, FrameGenMode};
    use crate::loader::tests::null_dispatch;
    use crate::motion::FrameImage;
    use ash::vk;
    use ash::vk::Handle;
    use std::sync::Arc;

    fn frame(id: u64) -> FrameImage {
        FrameImage {
            image: vk::Image::from_raw(id),
            view: vk::ImageView::from_raw(id),
            memory: vk::DeviceMemory::null(),
            width: 1920,
            height: 1080,
        }
    }

    fn orchestrator(mode: FrameGenMode) -> Arc<Mutex<FrameGenContext>> {
        Arc::new(Mutex::new(FrameGenContext::new(
            FrameGenConfig::new(1920, 1080, mode),
            None,
            Arc::new(null_dispatch()),
        )))
    }

    fn context_with(
        config: PresentConfig,
        frame_gen: &Arc<Mutex<FrameGenContext>>,
    ) -> PresentInjectionContext {
        PresentInjectionContext::new(config, Arc::downgrade(frame_gen), None)
    }

    #[test]
    fn enable_is_gated_by_mode() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let mut ctx = context_with(
            PresentConfig {
                mode: InjectionMode::Disabled,
                ..Default::default()
            },
            &frame_gen,
        );
        assert!(!ctx.is_enabled());
        ctx.set_enabled(true);
        assert!(!ctx.is_enabled());

        ctx.set_mode(InjectionMode::Single);
        ctx.set_enabled(true);
        assert!(ctx.is_enabled());
        ctx.set_mode(InjectionMode::Disabled);
        assert!(!ctx.is_enabled());
    }

    #[test]
    fn should_inject_conjunction() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        // Give the orchestrator a confident generated frame.
        {
            let mut fg = frame_gen.lock().unwrap();
            fg.push_frame(vk::CommandBuffer::null(), frame(1));
            fg.push_frame(vk::CommandBuffer::null(), frame(2));
        }

        let mut ctx = context_with(PresentConfig::default(), &frame_gen);
        assert!(ctx.should_inject());

        // Confidence floor above the orchestrator's score suppresses.
        ctx.config.min_confidence = 0.99;
        assert!(!ctx.should_inject());
        ctx.config.min_confidence = 0.5;

        // Scene change on the last real frame suppresses.
        {
            let mut fg = frame_gen.lock().unwrap();
            fg.set_scene_change_oracle(Box::new(|_| true));
            fg.push_frame(vk::CommandBuffer::null(), frame(3));
        }
        assert!(!ctx.should_inject());

        // Disabled context suppresses.
        {
            let mut fg = frame_gen.lock().unwrap();
            fg.set_scene_change_oracle(Box::new(|_| false));
            fg.push_frame(vk::CommandBuffer::null(), frame(4));
        }
        assert!(ctx.should_inject());
        ctx.set_enabled(false);
        assert!(!ctx.should_inject());
    }

    #[test]
    fn should_inject_pauses_under_lfc() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        {
            let mut fg = frame_gen.lock().unwrap();
            fg.push_frame(vk::CommandBuffer::null(), frame(1));
            fg.push_frame(vk::CommandBuffer::null(), frame(2));
        }
        let mut ctx = context_with(PresentConfig::default(), &frame_gen);
        ctx.set_vrr_config(VrrConfig::manual(48, 144, true));
        assert!(ctx.should_inject());

        // Real presents 40 ms apart put the source at 25 fps, below min_hz.
        for i in 0..4 {
            ctx.record_present_time_at(i * 40_000, false);
        }
        assert!(ctx.lfc_state().active);
        assert!(!ctx.should_inject());
    }

    #[test]
    fn should_inject_without_orchestrator_is_false() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let ctx = context_with(PresentConfig::default(), &frame_gen);
        drop(frame_gen);
        assert!(!ctx.should_inject());
    }

    #[test]
    fn injection_timing_fixed() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let ctx = context_with(
            PresentConfig {
                timing: InjectionTiming::Fixed,
                target_fps: 60,
                ..Default::default()
            },
            &frame_gen,
        );
        assert_eq!(ctx.calculate_injection_timing(), 8_333);
    }

    #[test]
    fn injection_timing_adaptive_with_fallback() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let mut ctx = context_with(PresentConfig::default(), &frame_gen);
        assert_eq!(ctx.calculate_injection_timing(), 8_333);

        ctx.record_present_time_at(0, false);
        ctx.record_present_time_at(20_000, false);
        ctx.record_present_time_at(40_000, false);
        assert_eq!(ctx.stats().avg_present_interval_us, 20_000);
        assert_eq!(ctx.calculate_injection_timing(), 10_000);
    }

    #[test]
    fn injection_timing_vrr_delegates() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let mut ctx = context_with(PresentConfig::default(), &frame_gen);
        ctx.set_vrr_config(VrrConfig::manual(48, 144, true));
        assert_eq!(ctx.config().timing, InjectionTiming::Vrr);

        ctx.record_present_time_at(0, false);
        ctx.record_present_time_at(16_667, false);
        let expected = VrrConfig::manual(48, 144, true)
            .calculate_injection_interval(ctx.stats().avg_present_interval_us);
        assert_eq!(ctx.calculate_injection_timing(), expected);
    }

    #[test]
    fn disabled_vrr_config_keeps_adaptive_timing() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let mut ctx = context_with(PresentConfig::default(), &frame_gen);
        let mut vrr = VrrConfig::manual(48, 144, true);
        vrr.enabled = false;
        ctx.set_vrr_config(vrr);
        assert_eq!(ctx.config().timing, InjectionTiming::Adaptive);
    }

    #[test]
    fn interval_ring_averages_over_written_slots() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let mut ctx = context_with(PresentConfig::default(), &frame_gen);

        ctx.record_present_time_at(1_000_000, false);
        assert_eq!(ctx.stats().avg_present_interval_us, 0);

        ctx.record_present_time_at(1_016_000, false);
        ctx.record_present_time_at(1_034_000, false);
        let stats = ctx.stats();
        assert_eq!(stats.avg_present_interval_us, 17_000);
        assert_eq!(stats.real_frames, 3);
        assert!((stats.effective_fps - 58.82).abs() < 0.1);
    }

    #[test]
    fn generated_presents_do_not_advance_frame_number() {
        let frame_gen = orchestrator(FrameGenMode::Performance);
        let mut ctx = context_with(PresentConfig::default(), &frame_gen);
        ctx.record_present_time_at(0, false);
        ctx.record_present_time_at(8_000, true);
        ctx.record_present_time_at(16_000, false);
        assert_eq!(ctx.frame_number(), 2);
        let stats = ctx.stats();
        assert_eq!(stats.real_frames, 2);
        assert_eq!(stats.generated_frames, 1);
    }

    #[test]
    fn layer_entry_point_names() {
        assert_eq!(LAYER_NAME, "VK_LAYER_NVX_frame_injection");
        assert!(INSTANCE_PROC_ADDR_ENTRY_POINT.ends_with("get_instance_proc_addr"));
        assert!(DEVICE_PROC_ADDR_ENTRY_POINT.ends_with("get_device_proc_addr"));
    }
}
