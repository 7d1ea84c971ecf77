//! # nvx
//!
//! This crate wraps the NVIDIA Vulkan extension surface for Linux gaming —
//! `VK_NV_low_latency2` (Reflex-style latency reduction),
//! `VK_NV_device_diagnostic_checkpoints` / `VK_NV_device_diagnostics_config`
//! (GPU crash diagnostics) and `VK_NV_optical_flow` — and builds two
//! runtimes on top of them: a per-swapchain low-latency frame-pacing state
//! machine and an optical-flow frame-generation pipeline with present
//! injection and VRR/LFC coordination.
//!
//! It is aimed at Vulkan translation layers (DXVK, vkd3d-proton) and native
//! engines: the host keeps ownership of every device, swapchain, image and
//! command buffer, and hands this crate raw handles plus its
//! `vkGetDeviceProcAddr`. A stable C ABI ([`capi`]) mirrors the whole
//! public surface for non-Rust hosts.
//!
//! ## API Usage
//! ```ignore
//! use nvx::{DeviceDispatch, LowLatencyContext, ModeConfig};
//! use nvx::{FrameGenConfig, FrameGenContext, FrameGenMode};
//! use std::sync::Arc;
//!
//! // One dispatch table per device, shared by every context.
//! let dispatch = Arc::new(DeviceDispatch::new(device, get_device_proc_addr));
//!
//! // Low-latency frame pacing on the swapchain.
//! let mut low_latency = LowLatencyContext::new(Arc::clone(&dispatch), swapchain);
//! if low_latency.is_supported() {
//!     low_latency.set_mode(ModeConfig::target_fps(120))?;
//! }
//!
//! // Render loop.
//! let present_id = low_latency.begin_frame();
//! low_latency.mark_input_sample();
//! // ... simulate ...
//! low_latency.end_simulation();
//! low_latency.begin_render_submit();
//! // ... submit command buffers ...
//! low_latency.end_render_submit();
//! low_latency.begin_present();
//! // ... vkQueuePresentKHR ...
//! low_latency.end_present();
//! low_latency.sleep(timeline_semaphore, present_id)?;
//!
//! // Frame generation on the same device.
//! let mut frame_gen = FrameGenContext::new(
//!     FrameGenConfig::new(1920, 1080, FrameGenMode::Performance),
//!     None,
//!     Arc::clone(&dispatch),
//! );
//! if let Some(generated) = frame_gen.push_frame(cmd, rendered_frame) {
//!     // Inject generated.image_view between real presents.
//! }
//! ```

mod error;
mod loader;
mod motion;
mod optical_flow;
mod synthesis;

/// Stable C ABI for non-Rust hosts.
pub mod capi;
/// GPU crash diagnostics (checkpoints and crash dumps).
pub mod diagnostics;
/// Optical-flow frame generation.
pub mod frame_generation;
/// Reflex-style low-latency frame pacing.
pub mod low_latency;
/// Present injection for generated frames.
pub mod present;
/// VRR display parameters and LFC tracking.
pub mod vrr;

pub use error::{NvxError, Result};
pub use frame_generation::{
    FrameGenConfig, FrameGenContext, FrameGenMode, FrameGenStats, GeneratedFrame,
    SceneChangeOracle,
};
pub use loader::{
    is_nvidia_gpu, DeviceDispatch, DriverVersion, VulkanLibrary, DRIVER_VERSION_PATH,
    RECOMMENDED_DRIVER_VERSION,
};
pub use low_latency::{
    FramePacer, FrameTimings, LatencyMarker, LatencyStats, LowLatencyContext, ModeConfig,
    SharedLowLatencyContext,
};
pub use motion::{
    float_to_s10_5, s10_5_to_float, FrameImage, MotionVectorBuffers, MotionVectorContext,
};
pub use optical_flow::{
    FlowBindingPoint, FlowGridSize, FlowPerformanceLevel, OpticalFlowConfig, OpticalFlowSession,
};
pub use synthesis::{
    BlendPushConstants, ConfidenceBlendPushConstants, FrameSynthesisContext,
    OcclusionFillPushConstants, SynthesisQuality, SynthesisShaders, SynthesisTuning,
    WarpPushConstants,
};

/// Library version, also exposed packed through the C ABI.
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;
