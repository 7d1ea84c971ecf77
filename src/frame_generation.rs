//! Frame-generation orchestrator.
//!
//! Consumes pairs of rendered frames, estimates motion on the optical-flow
//! unit, and synthesizes one intermediate frame per real frame. When the
//! device lacks the optical-flow extension (or the host has not installed
//! synthesis kernels), the orchestrator degrades to a pass-through that
//! re-presents the newest real frame instead of failing, so the host can
//! keep one code path.

use std::sync::{Arc, Weak};
use std::time::Instant;

use ash::vk;
use log::{debug, info, warn};

use crate::error::{NvxError, Result};
use crate::loader::DeviceDispatch;
use crate::low_latency::SharedLowLatencyContext;
use crate::motion::{FrameImage, MotionVectorBuffers, MotionVectorContext};
use crate::optical_flow::{
    FlowPerformanceLevel, OpticalFlowConfig, OpticalFlowSession,
};
use crate::synthesis::{FrameSynthesisContext, SynthesisQuality, SynthesisShaders};

/// Number of generation-time samples in the rolling average.
const GEN_TIME_SLOTS: usize = 8;

/// Confidence reported until a cost-map estimator lands. Scores are always
/// in `[0, 1]` and non-decreasing in cost-map quality.
const PLACEHOLDER_CONFIDENCE: f32 = 0.95;

/// Quality mode, selecting the optical-flow level and pass structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FrameGenMode {
    /// Passthrough; nothing is generated.
    Off = 0,
    /// Fast flow estimation, single forward warp and linear blend.
    Performance = 1,
    /// Medium flow estimation, bidirectional warp.
    Balanced = 2,
    /// Slow flow estimation, bidirectional warp with cost-weighted blend
    /// and disocclusion fill.
    Quality = 3,
}

impl FrameGenMode {
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Performance),
            2 => Some(Self::Balanced),
            3 => Some(Self::Quality),
            _ => None,
        }
    }

    pub(crate) fn flow_performance(self) -> FlowPerformanceLevel {
        match self {
            Self::Off | Self::Performance => FlowPerformanceLevel::Fast,
            Self::Balanced => FlowPerformanceLevel::Medium,
            Self::Quality => FlowPerformanceLevel::Slow,
        }
    }

    pub(crate) fn bidirectional(self) -> bool {
        matches!(self, Self::Balanced | Self::Quality)
    }

    pub(crate) fn cost_enabled(self) -> bool {
        self == Self::Quality
    }

    pub(crate) fn synthesis_quality(self) -> SynthesisQuality {
        match self {
            Self::Off | Self::Performance => SynthesisQuality::Linear,
            Self::Balanced => SynthesisQuality::Bidirectional,
            Self::Quality => SynthesisQuality::CostWeighted,
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct FrameGenConfig {
    pub width: u32,
    pub height: u32,
    pub mode: FrameGenMode,
    /// Generated frames scoring below this are withheld.
    pub confidence_threshold: f32,
    /// Oracle knob for cost-map or histogram based scene-change detectors.
    pub scene_change_threshold: f32,
    /// Include the generation cost in the reported latency compensation.
    pub latency_compensation: bool,
    pub target_frame_time_us: u64,
}

impl FrameGenConfig {
    pub fn new(width: u32, height: u32, mode: FrameGenMode) -> Self {
        Self {
            width,
            height,
            mode,
            confidence_threshold: 0.5,
            scene_change_threshold: 0.8,
            latency_compensation: true,
            target_frame_time_us: 16_666,
        }
    }
}

/// Aggregate counters exposed to the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameGenStats {
    pub generated_frames: u64,
    pub skipped_frames: u64,
    pub avg_gen_time_us: u64,
    pub confidence: f32,
    pub scene_change_detected: bool,
}

/// One synthesized frame, ready for injection into the present sequence.
#[derive(Debug, Clone, Copy)]
pub struct GeneratedFrame {
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub confidence: f32,
    pub generation_time_us: u64,
    pub frame_id: u64,
    pub should_present: bool,
}

/// Replaceable scene-change detector. Returning true makes the orchestrator
/// skip synthesis for that frame and count it as skipped.
pub type SceneChangeOracle = Box<dyn FnMut(&MotionVectorContext) -> bool + Send>;

/// Drives the motion-vector and synthesis stages for one device.
pub struct FrameGenContext {
    config: FrameGenConfig,
    dispatch: Arc<DeviceDispatch>,
    low_latency: Option<Weak<SharedLowLatencyContext>>,
    motion: MotionVectorContext,
    synthesis: Option<FrameSynthesisContext>,
    enabled: bool,
    frame_id: u64,
    stats: FrameGenStats,
    gen_times: [u64; GEN_TIME_SLOTS],
    gen_time_cursor: usize,
    scene_change_oracle: SceneChangeOracle,
}

impl FrameGenContext {
    /// Builds the sub-stages for `config.mode`. Missing driver support is
    /// tolerated: the affected stage stays uninitialized and `push_frame`
    /// degrades to pass-through.
    pub fn new(
        config: FrameGenConfig,
        low_latency: Option<Weak<SharedLowLatencyContext>>,
        dispatch: Arc<DeviceDispatch>,
    ) -> Self {
        let mut motion = MotionVectorContext::new();
        let mut flow_config = OpticalFlowConfig::new(config.width, config.height);
        flow_config.performance = config.mode.flow_performance();
        flow_config.bidirectional = config.mode.bidirectional();
        flow_config.cost_enabled = config.mode.cost_enabled();

        match OpticalFlowSession::create(Arc::clone(&dispatch), flow_config) {
            Ok(session) => motion.set_session(session),
            Err(err) => warn!("optical flow unavailable, frame generation degraded: {err}"),
        }

        let synthesis = match FrameSynthesisContext::new(
            Arc::clone(&dispatch),
            config.width,
            config.height,
            config.mode.synthesis_quality(),
        ) {
            Ok(synthesis) => Some(synthesis),
            Err(err) => {
                warn!("synthesis stage unavailable: {err}");
                None
            }
        };

        info!(
            "frame generation context: {}x{} mode {:?}",
            config.width, config.height, config.mode
        );
        let enabled = config.mode != FrameGenMode::Off;
        Self {
            config,
            dispatch,
            low_latency,
            motion,
            synthesis,
            enabled,
            frame_id: 0,
            stats: FrameGenStats::default(),
            gen_times: [0; GEN_TIME_SLOTS],
            gen_time_cursor: 0,
            scene_change_oracle: Box::new(|_| false),
        }
    }

    /// The optical-flow hardware path is usable on this device.
    pub fn is_supported(&self) -> bool {
        self.dispatch.has_optical_flow()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled && self.config.mode != FrameGenMode::Off;
        debug!("frame generation enabled={}", self.enabled);
    }

    pub fn set_mode(&mut self, mode: FrameGenMode) {
        self.config.mode = mode;
        if let Some(synthesis) = self.synthesis.as_mut() {
            synthesis.set_quality(mode.synthesis_quality());
        }
        if mode == FrameGenMode::Off {
            self.enabled = false;
        }
        debug!("frame generation mode {mode:?}");
    }

    pub fn mode(&self) -> FrameGenMode {
        self.config.mode
    }

    pub fn config(&self) -> &FrameGenConfig {
        &self.config
    }

    /// Replaces the scene-change detector.
    pub fn set_scene_change_oracle(&mut self, oracle: SceneChangeOracle) {
        self.scene_change_oracle = oracle;
    }

    /// Installs host-supplied synthesis kernels; see
    /// [`FrameSynthesisContext::install_shaders`].
    pub fn install_shaders(&mut self, shaders: &SynthesisShaders<'_>) -> Result<()> {
        self.synthesis
            .as_mut()
            .ok_or(NvxError::NotInitialized)?
            .install_shaders(shaders)
    }

    /// Installs the caller-owned output storage image.
    pub fn install_output(&mut self, output: FrameImage) -> Result<()> {
        self.synthesis
            .as_mut()
            .ok_or(NvxError::NotInitialized)?
            .install_output(output)
    }

    /// Installs the caller-owned motion-vector output images.
    pub fn install_motion_buffers(&mut self, buffers: MotionVectorBuffers) {
        self.motion.install_buffers(buffers);
    }

    /// Feeds one real frame and, when possible, records the synthesis of an
    /// intermediate frame onto `cmd`.
    ///
    /// Returns `None` while disabled, while history is short, on a scene
    /// change (counted as skipped) and below the confidence threshold.
    pub fn push_frame(
        &mut self,
        cmd: vk::CommandBuffer,
        frame: FrameImage,
    ) -> Option<GeneratedFrame> {
        let started = Instant::now();

        let has_history = self.motion.push(frame);
        if !self.enabled || !has_history {
            return None;
        }

        self.frame_id += 1;
        if let Some(low_latency) = self.low_latency.as_ref().and_then(Weak::upgrade) {
            let present_id = low_latency.current_present_id();
            if present_id != 0 {
                self.frame_id = present_id;
            }
        }

        if self.motion.has_session() && self.motion.motion_vectors().is_some() {
            if let Err(err) = self.motion.execute(cmd) {
                warn!("optical flow execution failed: {err}");
                return None;
            }
        }

        if (self.scene_change_oracle)(&self.motion) {
            self.stats.scene_change_detected = true;
            self.stats.skipped_frames += 1;
            debug!("scene change at frame {}, synthesis skipped", self.frame_id);
            return None;
        }
        self.stats.scene_change_detected = false;

        let (image, image_view) = match self.synthesize(cmd) {
            Some(result) => result,
            None => {
                // Degraded path: re-present the newest real frame.
                let current = self.motion.current_frame();
                (current.image, current.view)
            }
        };

        let confidence = self.estimate_confidence();
        self.stats.confidence = confidence;
        if confidence < self.config.confidence_threshold {
            debug!(
                "confidence {confidence:.2} below threshold {:.2}, frame withheld",
                self.config.confidence_threshold
            );
            return None;
        }

        let generation_time_us = started.elapsed().as_micros() as u64;
        self.record_gen_time(generation_time_us);
        self.stats.generated_frames += 1;

        Some(GeneratedFrame {
            image,
            image_view,
            confidence,
            generation_time_us,
            frame_id: self.frame_id,
            should_present: true,
        })
    }

    fn synthesize(&mut self, cmd: vk::CommandBuffer) -> Option<(vk::Image, vk::ImageView)> {
        let synthesis = self.synthesis.as_ref()?;
        if !synthesis.is_ready() {
            return None;
        }
        let buffers = *self.motion.motion_vectors()?;
        let prev_view = self.motion.previous_frame().view;
        let curr_view = self.motion.current_frame().view;
        match synthesis.synthesize(cmd, prev_view, curr_view, &buffers) {
            Ok(view) => {
                let image = synthesis.output().map(|output| output.image)?;
                Some((image, view))
            }
            Err(err) => {
                warn!("synthesis failed: {err}");
                None
            }
        }
    }

    fn estimate_confidence(&self) -> f32 {
        PLACEHOLDER_CONFIDENCE
    }

    // Fixed denominator of 8 once any sample exists; the zeroed ring keeps
    // the average at 0 before that.
    fn record_gen_time(&mut self, generation_time_us: u64) {
        self.gen_times[self.gen_time_cursor] = generation_time_us;
        self.gen_time_cursor = (self.gen_time_cursor + 1) % GEN_TIME_SLOTS;
        self.stats.avg_gen_time_us =
            self.gen_times.iter().sum::<u64>() / GEN_TIME_SLOTS as u64;
    }

    /// Microseconds to add to the pacing target so injected frames do not
    /// eat into input latency.
    pub fn get_latency_compensation(&self) -> u64 {
        if self.config.latency_compensation {
            self.config.target_frame_time_us / 2 + self.stats.avg_gen_time_us
        } else {
            0
        }
    }

    pub fn stats(&self) -> FrameGenStats {
        self.stats
    }

    pub fn current_frame_id(&self) -> u64 {
        self.frame_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::null_dispatch;
    use ash::vk::Handle;

    fn frame(id: u64) -> FrameImage {
        FrameImage {
            image: vk::Image::from_raw(id),
            view: vk::ImageView::from_raw(id),
            memory: vk::DeviceMemory::null(),
            width: 1920,
            height: 1080,
        }
    }

    fn test_context(mode: FrameGenMode) -> FrameGenContext {
        FrameGenContext::new(
            FrameGenConfig::new(1920, 1080, mode),
            None,
            Arc::new(null_dispatch()),
        )
    }

    #[test]
    fn mode_mapping() {
        assert_eq!(
            FrameGenMode::Performance.flow_performance(),
            FlowPerformanceLevel::Fast
        );
        assert_eq!(
            FrameGenMode::Balanced.flow_performance(),
            FlowPerformanceLevel::Medium
        );
        assert_eq!(
            FrameGenMode::Quality.flow_performance(),
            FlowPerformanceLevel::Slow
        );
        assert!(!FrameGenMode::Performance.bidirectional());
        assert!(FrameGenMode::Balanced.bidirectional());
        assert!(FrameGenMode::Quality.cost_enabled());
        assert!(!FrameGenMode::Balanced.cost_enabled());
        assert_eq!(
            FrameGenMode::Quality.synthesis_quality(),
            SynthesisQuality::CostWeighted
        );
        assert_eq!(FrameGenMode::from_raw(2), Some(FrameGenMode::Balanced));
        assert_eq!(FrameGenMode::from_raw(9), None);
    }

    #[test]
    fn enable_is_gated_by_mode() {
        let mut ctx = test_context(FrameGenMode::Off);
        assert!(!ctx.is_enabled());
        ctx.set_enabled(true);
        assert!(!ctx.is_enabled());

        ctx.set_mode(FrameGenMode::Performance);
        ctx.set_enabled(true);
        assert!(ctx.is_enabled());

        ctx.set_mode(FrameGenMode::Off);
        assert!(!ctx.is_enabled());
    }

    #[test]
    fn push_frame_needs_two_frames_of_history() {
        let mut ctx = test_context(FrameGenMode::Performance);
        assert!(ctx.push_frame(vk::CommandBuffer::null(), frame(1)).is_none());
        let generated = ctx.push_frame(vk::CommandBuffer::null(), frame(2));
        let generated = generated.expect("second push has enough history");
        assert!(generated.should_present);
        assert_eq!(generated.frame_id, 1);
        assert!(generated.confidence >= 0.9);
        assert_eq!(ctx.stats().generated_frames, 1);
    }

    #[test]
    fn disabled_context_generates_nothing() {
        let mut ctx = test_context(FrameGenMode::Performance);
        ctx.set_enabled(false);
        assert!(ctx.push_frame(vk::CommandBuffer::null(), frame(1)).is_none());
        assert!(ctx.push_frame(vk::CommandBuffer::null(), frame(2)).is_none());
        assert_eq!(ctx.stats().generated_frames, 0);
    }

    #[test]
    fn scene_change_skips_third_frame() {
        let mut ctx = test_context(FrameGenMode::Performance);
        // Oracle fires exactly on the third push.
        let mut push_index = 0u32;
        ctx.set_scene_change_oracle(Box::new(move |_| {
            push_index += 1;
            push_index == 2
        }));

        assert!(ctx.push_frame(vk::CommandBuffer::null(), frame(1)).is_none());
        assert!(ctx.push_frame(vk::CommandBuffer::null(), frame(2)).is_some());
        assert!(ctx.push_frame(vk::CommandBuffer::null(), frame(3)).is_none());

        let stats = ctx.stats();
        assert_eq!(stats.skipped_frames, 1);
        assert!(stats.scene_change_detected);
        assert_eq!(stats.generated_frames, 1);
    }

    #[test]
    fn confidence_threshold_withholds_frames() {
        let mut ctx = test_context(FrameGenMode::Performance);
        ctx.config.confidence_threshold = 0.99;
        ctx.push_frame(vk::CommandBuffer::null(), frame(1));
        assert!(ctx.push_frame(vk::CommandBuffer::null(), frame(2)).is_none());
        assert_eq!(ctx.stats().generated_frames, 0);
        // Withheld frames are not scene-change skips.
        assert_eq!(ctx.stats().skipped_frames, 0);
    }

    #[test]
    fn latency_compensation_follows_config() {
        let mut ctx = test_context(FrameGenMode::Performance);
        assert_eq!(ctx.get_latency_compensation(), 16_666 / 2);

        ctx.push_frame(vk::CommandBuffer::null(), frame(1));
        ctx.push_frame(vk::CommandBuffer::null(), frame(2));
        let stats = ctx.stats();
        assert_eq!(
            ctx.get_latency_compensation(),
            16_666 / 2 + stats.avg_gen_time_us
        );

        ctx.config.latency_compensation = false;
        assert_eq!(ctx.get_latency_compensation(), 0);
    }

    #[test]
    fn rolling_average_divides_by_eight() {
        let mut ctx = test_context(FrameGenMode::Performance);
        ctx.record_gen_time(800);
        assert_eq!(ctx.stats().avg_gen_time_us, 100);
        for _ in 0..7 {
            ctx.record_gen_time(800);
        }
        assert_eq!(ctx.stats().avg_gen_time_us, 800);
    }
}
