//! `VK_NV_low_latency2` frame pacing (Reflex-style latency reduction).
//!
//! One [`LowLatencyContext`] per swapchain. The application drives it once
//! per frame: [`begin_frame`](LowLatencyContext::begin_frame) advances the
//! present ID and stamps the simulation-start marker, the convenience
//! methods stamp the remaining phase markers, and
//! [`sleep`](LowLatencyContext::sleep) asks the driver to signal a timeline
//! semaphore at the optimal instant to start the next frame. Driver-reported
//! per-frame timings feed a rolling [`LatencyStats`] window.

use std::sync::{Arc, Mutex};

use ash::vk;
use log::{debug, trace};

use crate::error::{check_vk, NvxError, Result};
use crate::loader::DeviceDispatch;

/// Frame-phase markers, stamped against the current present ID.
///
/// Values are stable and match the driver's marker enumeration. The caller
/// stamps markers in its natural phase order; no ordering is enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LatencyMarker {
    SimulationStart = 0,
    SimulationEnd = 1,
    RenderSubmitStart = 2,
    RenderSubmitEnd = 3,
    PresentStart = 4,
    PresentEnd = 5,
    InputSample = 6,
    TriggerFlash = 7,
    OutOfBandRenderSubmitStart = 8,
    OutOfBandRenderSubmitEnd = 9,
    OutOfBandPresentStart = 10,
    OutOfBandPresentEnd = 11,
}

impl LatencyMarker {
    pub fn from_raw(value: u32) -> Option<Self> {
        use LatencyMarker::*;
        const ALL: [LatencyMarker; 12] = [
            SimulationStart,
            SimulationEnd,
            RenderSubmitStart,
            RenderSubmitEnd,
            PresentStart,
            PresentEnd,
            InputSample,
            TriggerFlash,
            OutOfBandRenderSubmitStart,
            OutOfBandRenderSubmitEnd,
            OutOfBandPresentStart,
            OutOfBandPresentEnd,
        ];
        ALL.into_iter().find(|marker| *marker as u32 == value)
    }

    fn to_vk(self) -> vk::LatencyMarkerNV {
        vk::LatencyMarkerNV::from_raw(self as i32)
    }
}

/// Low-latency mode submitted to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeConfig {
    pub enabled: bool,
    pub boost: bool,
    /// Minimum present-to-present interval in microseconds; 0 = uncapped.
    pub minimum_interval_us: u32,
}

impl ModeConfig {
    /// Enabled mode capped at `fps` frames per second (0 = uncapped).
    pub fn target_fps(fps: u32) -> Self {
        Self {
            enabled: true,
            boost: false,
            minimum_interval_us: if fps == 0 { 0 } else { 1_000_000 / fps },
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

/// Per-frame timing report from the driver, keyed by present ID.
///
/// A field equal to 0 means "not reported"; the derived times below yield 0
/// for such records rather than nonsense differences.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTimings {
    pub present_id: u64,
    pub input_sample_time_us: u64,
    pub sim_start_time_us: u64,
    pub sim_end_time_us: u64,
    pub render_submit_start_time_us: u64,
    pub render_submit_end_time_us: u64,
    pub present_start_time_us: u64,
    pub present_end_time_us: u64,
    pub driver_start_time_us: u64,
    pub driver_end_time_us: u64,
    pub gpu_render_start_time_us: u64,
    pub gpu_render_end_time_us: u64,
}

impl FrameTimings {
    fn span(end: u64, start: u64) -> u64 {
        if end == 0 || start == 0 {
            0
        } else {
            end.saturating_sub(start)
        }
    }

    /// Input sample to present end.
    pub fn total_latency_us(&self) -> u64 {
        Self::span(self.present_end_time_us, self.input_sample_time_us)
    }

    pub fn sim_time_us(&self) -> u64 {
        Self::span(self.sim_end_time_us, self.sim_start_time_us)
    }

    pub fn gpu_render_time_us(&self) -> u64 {
        Self::span(self.gpu_render_end_time_us, self.gpu_render_start_time_us)
    }

    pub fn driver_time_us(&self) -> u64 {
        Self::span(self.driver_end_time_us, self.driver_start_time_us)
    }

    fn from_report(report: &vk::LatencyTimingsFrameReportNV) -> Self {
        Self {
            present_id: report.present_id,
            input_sample_time_us: report.input_sample_time_us,
            sim_start_time_us: report.sim_start_time_us,
            sim_end_time_us: report.sim_end_time_us,
            render_submit_start_time_us: report.render_submit_start_time_us,
            render_submit_end_time_us: report.render_submit_end_time_us,
            present_start_time_us: report.present_start_time_us,
            present_end_time_us: report.present_end_time_us,
            driver_start_time_us: report.driver_start_time_us,
            driver_end_time_us: report.driver_end_time_us,
            gpu_render_start_time_us: report.gpu_render_start_time_us,
            gpu_render_end_time_us: report.gpu_render_end_time_us,
        }
    }
}

/// Capacity of the rolling total-latency window.
pub const LATENCY_SAMPLE_CAPACITY: usize = 128;

/// Rolling window of total-latency samples with O(1) average and
/// sort-on-demand percentile.
#[derive(Clone)]
pub struct LatencyStats {
    samples: [u64; LATENCY_SAMPLE_CAPACITY],
    cursor: usize,
    len: usize,
    sum: u64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self {
            samples: [0; LATENCY_SAMPLE_CAPACITY],
            cursor: 0,
            len: 0,
            sum: 0,
        }
    }

    pub fn insert(&mut self, total_latency_us: u64) {
        if self.len == LATENCY_SAMPLE_CAPACITY {
            self.sum -= self.samples[self.cursor];
        } else {
            self.len += 1;
        }
        self.samples[self.cursor] = total_latency_us;
        self.sum += total_latency_us;
        self.cursor = (self.cursor + 1) % LATENCY_SAMPLE_CAPACITY;
    }

    pub fn sample_count(&self) -> usize {
        self.len
    }

    fn live(&self) -> &[u64] {
        &self.samples[..self.len]
    }

    pub fn average_us(&self) -> u64 {
        if self.len == 0 {
            0
        } else {
            self.sum / self.len as u64
        }
    }

    pub fn min_us(&self) -> u64 {
        self.live().iter().copied().min().unwrap_or(0)
    }

    pub fn max_us(&self) -> u64 {
        self.live().iter().copied().max().unwrap_or(0)
    }

    /// Approximate 99th percentile over the live samples.
    pub fn p99_us(&self) -> u64 {
        if self.len == 0 {
            return 0;
        }
        let mut sorted = self.live().to_vec();
        sorted.sort_unstable();
        sorted[(sorted.len() * 99 / 100).min(sorted.len() - 1)]
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-swapchain low-latency state machine.
///
/// State is nothing more than the submitted mode and the current present ID;
/// phase transitions are implicit in which markers the caller has stamped.
/// Not safe for concurrent use; see [`SharedLowLatencyContext`] for the
/// locked variant.
pub struct LowLatencyContext {
    dispatch: Arc<DeviceDispatch>,
    swapchain: vk::SwapchainKHR,
    mode: ModeConfig,
    current_present_id: u64,
    stats: LatencyStats,
}

impl LowLatencyContext {
    pub fn new(dispatch: Arc<DeviceDispatch>, swapchain: vk::SwapchainKHR) -> Self {
        Self {
            dispatch,
            swapchain,
            mode: ModeConfig::default(),
            current_present_id: 0,
            stats: LatencyStats::new(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.dispatch.has_low_latency_2()
    }

    pub fn mode(&self) -> ModeConfig {
        self.mode
    }

    /// Submits `mode` to the driver and stores it on success.
    pub fn set_mode(&mut self, mode: ModeConfig) -> Result<()> {
        let Some(set_sleep_mode) = self.dispatch.set_latency_sleep_mode_nv else {
            return Err(NvxError::ExtensionNotPresent);
        };
        let info = vk::LatencySleepModeInfoNV::default()
            .low_latency_mode(mode.enabled)
            .low_latency_boost(mode.boost)
            .minimum_interval_us(mode.minimum_interval_us);
        check_vk(unsafe { set_sleep_mode(self.dispatch.device(), self.swapchain, &info) })?;
        debug!(
            "low-latency mode: enabled={} boost={} min_interval={}us",
            mode.enabled, mode.boost, mode.minimum_interval_us
        );
        self.mode = mode;
        Ok(())
    }

    pub fn enable(&mut self, boost: bool, minimum_interval_us: u32) -> Result<()> {
        self.set_mode(ModeConfig {
            enabled: true,
            boost,
            minimum_interval_us,
        })
    }

    pub fn disable(&mut self) -> Result<()> {
        self.set_mode(ModeConfig::disabled())
    }

    /// Asks the driver to signal `semaphore` at `value` at the optimal
    /// frame-start instant. Never blocks the calling thread; the caller
    /// waits on the timeline semaphore.
    pub fn sleep(&self, semaphore: vk::Semaphore, value: u64) -> Result<()> {
        let Some(latency_sleep) = self.dispatch.latency_sleep_nv else {
            return Err(NvxError::ExtensionNotPresent);
        };
        let info = vk::LatencySleepInfoNV::default()
            .signal_semaphore(semaphore)
            .value(value);
        check_vk(unsafe { latency_sleep(self.dispatch.device(), self.swapchain, &info) })
    }

    /// Stamps `marker` at the current present ID. Silent no-op when the
    /// extension is absent.
    pub fn set_marker(&self, marker: LatencyMarker) {
        let Some(set_marker) = self.dispatch.set_latency_marker_nv else {
            return;
        };
        let info = vk::SetLatencyMarkerInfoNV::default()
            .present_id(self.current_present_id)
            .marker(marker.to_vk());
        unsafe { set_marker(self.dispatch.device(), self.swapchain, &info) };
        trace!("marker {marker:?} (present {})", self.current_present_id);
    }

    /// Advances the present ID, stamps simulation-start, returns the new ID.
    pub fn begin_frame(&mut self) -> u64 {
        self.current_present_id += 1;
        self.set_marker(LatencyMarker::SimulationStart);
        self.current_present_id
    }

    pub fn current_present_id(&self) -> u64 {
        self.current_present_id
    }

    pub fn end_simulation(&self) {
        self.set_marker(LatencyMarker::SimulationEnd);
    }

    pub fn begin_render_submit(&self) {
        self.set_marker(LatencyMarker::RenderSubmitStart);
    }

    pub fn end_render_submit(&self) {
        self.set_marker(LatencyMarker::RenderSubmitEnd);
    }

    pub fn begin_present(&self) {
        self.set_marker(LatencyMarker::PresentStart);
    }

    pub fn end_present(&self) {
        self.set_marker(LatencyMarker::PresentEnd);
    }

    pub fn mark_input_sample(&self) {
        self.set_marker(LatencyMarker::InputSample);
    }

    pub fn trigger_flash(&self) {
        self.set_marker(LatencyMarker::TriggerFlash);
    }

    /// Fetches driver timing reports into `out` and returns how many were
    /// written. Records with unreported fields come back verbatim; complete
    /// records also feed the rolling latency window.
    pub fn get_timings(&mut self, out: &mut [FrameTimings]) -> usize {
        let Some(get_timings) = self.dispatch.get_latency_timings_nv else {
            return 0;
        };

        let mut query = vk::GetLatencyMarkerInfoNV::default();
        unsafe { get_timings(self.dispatch.device(), self.swapchain, &mut query) };
        let available = query.timing_count as usize;
        if available == 0 || out.is_empty() {
            return 0;
        }

        let capacity = available.min(out.len());
        let mut reports = vec![vk::LatencyTimingsFrameReportNV::default(); capacity];
        let written = {
            let mut fill = vk::GetLatencyMarkerInfoNV::default().timings(&mut reports);
            unsafe { get_timings(self.dispatch.device(), self.swapchain, &mut fill) };
            (fill.timing_count as usize).min(capacity)
        };

        for (slot, report) in out.iter_mut().zip(&reports[..written]) {
            *slot = FrameTimings::from_report(report);
            let total = slot.total_latency_us();
            if total > 0 {
                self.stats.insert(total);
            }
        }
        written
    }

    pub fn stats(&self) -> &LatencyStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

unsafe impl Send for LowLatencyContext {}

/// Mutex-serialized wrapper exposing the same operations for hosts that
/// drive one swapchain from more than one thread.
pub struct SharedLowLatencyContext {
    inner: Mutex<LowLatencyContext>,
}

impl SharedLowLatencyContext {
    pub fn new(context: LowLatencyContext) -> Self {
        Self {
            inner: Mutex::new(context),
        }
    }

    fn locked<T>(&self, f: impl FnOnce(&mut LowLatencyContext) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn is_supported(&self) -> bool {
        self.locked(|ctx| ctx.is_supported())
    }

    pub fn mode(&self) -> ModeConfig {
        self.locked(|ctx| ctx.mode())
    }

    pub fn set_mode(&self, mode: ModeConfig) -> Result<()> {
        self.locked(|ctx| ctx.set_mode(mode))
    }

    pub fn enable(&self, boost: bool, minimum_interval_us: u32) -> Result<()> {
        self.locked(|ctx| ctx.enable(boost, minimum_interval_us))
    }

    pub fn disable(&self) -> Result<()> {
        self.locked(|ctx| ctx.disable())
    }

    pub fn sleep(&self, semaphore: vk::Semaphore, value: u64) -> Result<()> {
        self.locked(|ctx| ctx.sleep(semaphore, value))
    }

    pub fn set_marker(&self, marker: LatencyMarker) {
        self.locked(|ctx| ctx.set_marker(marker));
    }

    pub fn begin_frame(&self) -> u64 {
        self.locked(|ctx| ctx.begin_frame())
    }

    pub fn current_present_id(&self) -> u64 {
        self.locked(|ctx| ctx.current_present_id())
    }

    pub fn end_simulation(&self) {
        self.locked(|ctx| ctx.end_simulation());
    }

    pub fn begin_render_submit(&self) {
        self.locked(|ctx| ctx.begin_render_submit());
    }

    pub fn end_render_submit(&self) {
        self.locked(|ctx| ctx.end_render_submit());
    }

    pub fn begin_present(&self) {
        self.locked(|ctx| ctx.begin_present());
    }

    pub fn end_present(&self) {
        self.locked(|ctx| ctx.end_present());
    }

    pub fn mark_input_sample(&self) {
        self.locked(|ctx| ctx.mark_input_sample());
    }

    pub fn trigger_flash(&self) {
        self.locked(|ctx| ctx.trigger_flash());
    }

    pub fn get_timings(&self, out: &mut [FrameTimings]) -> usize {
        self.locked(|ctx| ctx.get_timings(out))
    }

    pub fn stats(&self) -> LatencyStats {
        self.locked(|ctx| ctx.stats().clone())
    }

    pub fn reset_stats(&self) {
        self.locked(|ctx| ctx.reset_stats());
    }
}

/// Maps a target frame rate onto a low-latency mode and tracks the
/// wall-clock delta between frames.
#[derive(Debug, Clone)]
pub struct FramePacer {
    target_fps: u32,
    target_frame_time_us: u64,
    last_frame_time_us: u64,
    frame_count: u64,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        Self {
            target_fps,
            target_frame_time_us: if target_fps == 0 {
                0
            } else {
                1_000_000 / target_fps as u64
            },
            last_frame_time_us: 0,
            frame_count: 0,
        }
    }

    /// Pacer with no frame cap; maps to enabled + boost, uncapped interval.
    pub fn uncapped() -> Self {
        Self::new(0)
    }

    pub fn mode_config(&self) -> ModeConfig {
        ModeConfig {
            enabled: true,
            boost: self.target_fps == 0,
            minimum_interval_us: self.target_frame_time_us as u32,
        }
    }

    /// Records a frame boundary at `now_us` and returns the delta to the
    /// previous boundary (0 on the first call).
    pub fn record_frame(&mut self, now_us: u64) -> u64 {
        let delta = if self.last_frame_time_us == 0 {
            0
        } else {
            now_us.saturating_sub(self.last_frame_time_us)
        };
        self.last_frame_time_us = now_us;
        self.frame_count += 1;
        delta
    }

    pub fn is_ahead_of_target(&self, frame_time_us: u64) -> bool {
        self.target_frame_time_us != 0 && frame_time_us < self.target_frame_time_us
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn target_frame_time_us(&self) -> u64 {
        self.target_frame_time_us
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::null_dispatch;

    fn null_context() -> LowLatencyContext {
        LowLatencyContext::new(Arc::new(null_dispatch()), vk::SwapchainKHR::null())
    }

    #[test]
    fn mode_config_target_fps() {
        assert_eq!(ModeConfig::target_fps(60).minimum_interval_us, 16_666);
        assert_eq!(ModeConfig::target_fps(144).minimum_interval_us, 6_944);
        assert_eq!(ModeConfig::target_fps(0).minimum_interval_us, 0);
        assert!(ModeConfig::target_fps(0).enabled);
    }

    #[test]
    fn timings_zero_fields_yield_zero() {
        let mut timings = FrameTimings {
            present_id: 7,
            input_sample_time_us: 0,
            present_end_time_us: 1_000,
            ..Default::default()
        };
        assert_eq!(timings.total_latency_us(), 0);

        timings.input_sample_time_us = 400;
        timings.present_end_time_us = 0;
        assert_eq!(timings.total_latency_us(), 0);

        timings.present_end_time_us = 1_000;
        assert_eq!(timings.total_latency_us(), 600);

        assert_eq!(timings.sim_time_us(), 0);
        timings.sim_start_time_us = 100;
        timings.sim_end_time_us = 250;
        assert_eq!(timings.sim_time_us(), 150);
        assert_eq!(timings.gpu_render_time_us(), 0);
        assert_eq!(timings.driver_time_us(), 0);
    }

    #[test]
    fn latency_stats_aggregation() {
        let mut stats = LatencyStats::new();
        for sample in [5_000, 6_000, 4_000] {
            stats.insert(sample);
        }
        assert_eq!(stats.sample_count(), 3);
        assert_eq!(stats.average_us(), 5_000);
        assert_eq!(stats.min_us(), 4_000);
        assert_eq!(stats.max_us(), 6_000);

        for _ in 0..125 {
            stats.insert(5_000);
        }
        assert_eq!(stats.sample_count(), 128);
        assert_eq!(stats.average_us(), 5_000);

        stats.reset();
        assert_eq!(stats.sample_count(), 0);
        assert_eq!(stats.average_us(), 0);
        assert_eq!(stats.min_us(), 0);
        assert_eq!(stats.p99_us(), 0);
    }

    #[test]
    fn latency_stats_evicts_oldest() {
        let mut stats = LatencyStats::new();
        stats.insert(1_000_000);
        for _ in 0..127 {
            stats.insert(2_000);
        }
        assert_eq!(stats.sample_count(), 128);
        assert_eq!(stats.max_us(), 1_000_000);

        // 129th insertion pushes out the outlier.
        stats.insert(2_000);
        assert_eq!(stats.sample_count(), 128);
        assert_eq!(stats.average_us(), 2_000);
        assert_eq!(stats.max_us(), 2_000);
    }

    #[test]
    fn latency_stats_p99() {
        let mut stats = LatencyStats::new();
        for sample in 1..=100u64 {
            stats.insert(sample * 100);
        }
        assert_eq!(stats.p99_us(), 10_000);
    }

    #[test]
    fn frame_pacer_deltas_and_target() {
        let mut pacer = FramePacer::new(60);
        assert_eq!(pacer.target_frame_time_us(), 16_666);
        assert_eq!(pacer.record_frame(1_000_000), 0);
        assert_eq!(pacer.record_frame(1_016_666), 16_666);
        assert_eq!(pacer.frame_count(), 2);
        assert!(pacer.is_ahead_of_target(10_000));
        assert!(!pacer.is_ahead_of_target(20_000));
    }

    #[test]
    fn frame_pacer_uncapped_maps_to_boost() {
        let pacer = FramePacer::uncapped();
        assert_eq!(pacer.target_fps(), 0);
        let mode = pacer.mode_config();
        assert!(mode.enabled);
        assert!(mode.boost);
        assert_eq!(mode.minimum_interval_us, 0);
        assert!(!pacer.is_ahead_of_target(1));
    }

    #[test]
    fn frame_loop_without_extension() {
        // Scenario: a full 60 FPS frame loop against a device without the
        // extension. Marker stamping is a no-op, enable reports the absence,
        // and present IDs still advance 1, 2, 3.
        let mut ctx = null_context();
        assert!(!ctx.is_supported());
        assert_eq!(
            ctx.enable(false, 16_666),
            Err(NvxError::ExtensionNotPresent)
        );

        for expected in 1..=3u64 {
            let id = ctx.begin_frame();
            assert_eq!(id, expected);
            assert_eq!(ctx.current_present_id(), expected);
            ctx.end_simulation();
            ctx.begin_render_submit();
            ctx.end_render_submit();
            ctx.begin_present();
            ctx.end_present();
        }

        assert_eq!(
            ctx.sleep(vk::Semaphore::null(), 1),
            Err(NvxError::ExtensionNotPresent)
        );
        let mut out = [FrameTimings::default(); 4];
        assert_eq!(ctx.get_timings(&mut out), 0);
    }

    #[test]
    fn shared_wrapper_serializes_same_operations() {
        let shared = SharedLowLatencyContext::new(null_context());
        assert!(!shared.is_supported());
        assert_eq!(
            shared.set_mode(ModeConfig::target_fps(120)),
            Err(NvxError::ExtensionNotPresent)
        );
        assert_eq!(shared.mode(), ModeConfig::default());

        // A full frame driven through the wrapper alone.
        assert_eq!(shared.begin_frame(), 1);
        shared.mark_input_sample();
        shared.end_simulation();
        shared.begin_render_submit();
        shared.end_render_submit();
        shared.begin_present();
        shared.end_present();
        shared.trigger_flash();
        assert_eq!(shared.begin_frame(), 2);
        assert_eq!(shared.current_present_id(), 2);

        let mut out = [FrameTimings::default(); 2];
        assert_eq!(shared.get_timings(&mut out), 0);
        assert_eq!(shared.stats().sample_count(), 0);
        shared.reset_stats();
        assert_eq!(
            shared.sleep(vk::Semaphore::null(), 1),
            Err(NvxError::ExtensionNotPresent)
        );
    }
}
