//! Stable C ABI.
//!
//! A flat set of `extern "C"` functions over the low-latency, diagnostics
//! and frame-generation contexts, for hosts (DXVK, vkd3d-proton, native
//! engines) that cannot link Rust directly. Handles are opaque boxes from
//! the process global allocator; recoverable errors map onto [`NvxResult`].
//!
//! Null handles are tolerated everywhere: queries return a zero value and
//! state changes return [`NvxResult::InvalidHandle`].

use std::ffi::{c_char, c_void};
use std::sync::Arc;

use ash::vk::{self, Handle};

use crate::diagnostics::{CheckpointTag, DiagnosticsConfigFlags, DiagnosticsContext};
use crate::error::NvxError;
use crate::frame_generation::{FrameGenConfig, FrameGenContext, FrameGenMode};
use crate::loader::{is_nvidia_gpu, DeviceDispatch};
use crate::low_latency::{FrameTimings, LatencyMarker, LowLatencyContext};
use crate::{VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH};

/// Flat result codes. Values are ABI-stable.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvxResult {
    Success = 0,
    NotSupported = -1,
    InvalidHandle = -2,
    OutOfMemory = -3,
    DeviceLost = -4,
    Unknown = -5,
}

impl From<NvxError> for NvxResult {
    fn from(err: NvxError) -> Self {
        match err {
            NvxError::ExtensionNotPresent
            | NvxError::NotInitialized
            | NvxError::InsufficientFrames
            | NvxError::FormatNotSupported => Self::NotSupported,
            NvxError::InvalidHandle => Self::InvalidHandle,
            NvxError::OutOfHostMemory | NvxError::OutOfDeviceMemory => Self::OutOfMemory,
            NvxError::DeviceLost => Self::DeviceLost,
            _ => Self::Unknown,
        }
    }
}

fn to_result(result: crate::error::Result<()>) -> NvxResult {
    match result {
        Ok(()) => NvxResult::Success,
        Err(err) => err.into(),
    }
}

// Marker values mirrored for C callers.
pub const NVX_MARKER_SIMULATION_START: u32 = 0;
pub const NVX_MARKER_SIMULATION_END: u32 = 1;
pub const NVX_MARKER_RENDERSUBMIT_START: u32 = 2;
pub const NVX_MARKER_RENDERSUBMIT_END: u32 = 3;
pub const NVX_MARKER_PRESENT_START: u32 = 4;
pub const NVX_MARKER_PRESENT_END: u32 = 5;
pub const NVX_MARKER_INPUT_SAMPLE: u32 = 6;
pub const NVX_MARKER_TRIGGER_FLASH: u32 = 7;
pub const NVX_MARKER_OUT_OF_BAND_RENDERSUBMIT_START: u32 = 8;
pub const NVX_MARKER_OUT_OF_BAND_RENDERSUBMIT_END: u32 = 9;
pub const NVX_MARKER_OUT_OF_BAND_PRESENT_START: u32 = 10;
pub const NVX_MARKER_OUT_OF_BAND_PRESENT_END: u32 = 11;

// Checkpoint tag values mirrored for C callers.
pub const NVX_CHECKPOINT_FRAME_START: u32 = 0x1000;
pub const NVX_CHECKPOINT_FRAME_END: u32 = 0x1001;
pub const NVX_CHECKPOINT_DRAW_START: u32 = 0x2000;
pub const NVX_CHECKPOINT_DRAW_END: u32 = 0x2001;
pub const NVX_CHECKPOINT_COMPUTE_START: u32 = 0x3000;
pub const NVX_CHECKPOINT_COMPUTE_END: u32 = 0x3001;
pub const NVX_CHECKPOINT_TRANSFER_START: u32 = 0x4000;
pub const NVX_CHECKPOINT_TRANSFER_END: u32 = 0x4001;

/// Opaque low-latency handle.
pub struct NvxLowLatencyHandle {
    context: LowLatencyContext,
}

/// Opaque diagnostics handle.
pub struct NvxDiagnosticsHandle {
    context: DiagnosticsContext,
}

/// Opaque frame-generation handle.
pub struct NvxFrameGenHandle {
    context: FrameGenContext,
}

/// Frame-generation statistics POD for C callers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NvxFrameGenStats {
    pub generated_frames: u64,
    pub skipped_frames: u64,
    pub avg_gen_time_us: u64,
    pub confidence: f32,
    pub scene_change_detected: bool,
}

unsafe fn dispatch_for(
    device: *mut c_void,
    get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
) -> Option<Arc<DeviceDispatch>> {
    if device.is_null() {
        return None;
    }
    let get_device_proc_addr = get_device_proc_addr?;
    Some(Arc::new(DeviceDispatch::new(
        vk::Device::from_raw(device as u64),
        get_device_proc_addr,
    )))
}

// --- low latency ---------------------------------------------------------

/// Creates a low-latency context for `swapchain`. Returns null only on null
/// arguments; an unsupported device still yields a handle that reports
/// `nvx_low_latency_is_supported() == false`.
#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_init(
    device: *mut c_void,
    swapchain: u64,
    get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
) -> *mut NvxLowLatencyHandle {
    let Some(dispatch) = dispatch_for(device, get_device_proc_addr) else {
        return std::ptr::null_mut();
    };
    let context = LowLatencyContext::new(dispatch, vk::SwapchainKHR::from_raw(swapchain));
    Box::into_raw(Box::new(NvxLowLatencyHandle { context }))
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_destroy(handle: *mut NvxLowLatencyHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_is_supported(handle: *const NvxLowLatencyHandle) -> bool {
    handle
        .as_ref()
        .is_some_and(|handle| handle.context.is_supported())
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_enable(
    handle: *mut NvxLowLatencyHandle,
    boost: bool,
    min_interval_us: u32,
) -> NvxResult {
    let Some(handle) = handle.as_mut() else {
        return NvxResult::InvalidHandle;
    };
    to_result(handle.context.enable(boost, min_interval_us))
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_disable(handle: *mut NvxLowLatencyHandle) -> NvxResult {
    let Some(handle) = handle.as_mut() else {
        return NvxResult::InvalidHandle;
    };
    to_result(handle.context.disable())
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_sleep(
    handle: *mut NvxLowLatencyHandle,
    semaphore: u64,
    value: u64,
) -> NvxResult {
    let Some(handle) = handle.as_ref() else {
        return NvxResult::InvalidHandle;
    };
    to_result(
        handle
            .context
            .sleep(vk::Semaphore::from_raw(semaphore), value),
    )
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_set_marker(
    handle: *mut NvxLowLatencyHandle,
    marker: u32,
) {
    let Some(handle) = handle.as_ref() else {
        return;
    };
    if let Some(marker) = LatencyMarker::from_raw(marker) {
        handle.context.set_marker(marker);
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_begin_frame(handle: *mut NvxLowLatencyHandle) -> u64 {
    match handle.as_mut() {
        Some(handle) => handle.context.begin_frame(),
        None => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_get_current_frame_id(
    handle: *const NvxLowLatencyHandle,
) -> u64 {
    match handle.as_ref() {
        Some(handle) => handle.context.current_present_id(),
        None => 0,
    }
}

macro_rules! marker_shorthand {
    ($name:ident, $method:ident) => {
        #[no_mangle]
        pub unsafe extern "C" fn $name(handle: *mut NvxLowLatencyHandle) {
            if let Some(handle) = handle.as_ref() {
                handle.context.$method();
            }
        }
    };
}

marker_shorthand!(nvx_low_latency_end_simulation, end_simulation);
marker_shorthand!(nvx_low_latency_begin_render_submit, begin_render_submit);
marker_shorthand!(nvx_low_latency_end_render_submit, end_render_submit);
marker_shorthand!(nvx_low_latency_begin_present, begin_present);
marker_shorthand!(nvx_low_latency_end_present, end_present);
marker_shorthand!(nvx_low_latency_mark_input_sample, mark_input_sample);

/// Fills `timings` with up to `max_count` driver reports; returns how many
/// were written.
#[no_mangle]
pub unsafe extern "C" fn nvx_low_latency_get_timings(
    handle: *mut NvxLowLatencyHandle,
    timings: *mut FrameTimings,
    max_count: u32,
) -> u32 {
    let Some(handle) = handle.as_mut() else {
        return 0;
    };
    if timings.is_null() || max_count == 0 {
        return 0;
    }
    let out = std::slice::from_raw_parts_mut(timings, max_count as usize);
    handle.context.get_timings(out) as u32
}

// --- diagnostics ---------------------------------------------------------

/// Creates a diagnostics context. Returns null only on null arguments.
#[no_mangle]
pub unsafe extern "C" fn nvx_diagnostics_init(
    device: *mut c_void,
    get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
) -> *mut NvxDiagnosticsHandle {
    let Some(dispatch) = dispatch_for(device, get_device_proc_addr) else {
        return std::ptr::null_mut();
    };
    let context = DiagnosticsContext::new(dispatch);
    Box::into_raw(Box::new(NvxDiagnosticsHandle { context }))
}

#[no_mangle]
pub unsafe extern "C" fn nvx_diagnostics_destroy(handle: *mut NvxDiagnosticsHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_diagnostics_is_supported(
    handle: *const NvxDiagnosticsHandle,
) -> bool {
    handle
        .as_ref()
        .is_some_and(|handle| handle.context.is_supported())
}

#[no_mangle]
pub unsafe extern "C" fn nvx_diagnostics_set_checkpoint(
    handle: *mut NvxDiagnosticsHandle,
    cmd: *mut c_void,
    marker: *const c_void,
) {
    if let Some(handle) = handle.as_ref() {
        handle
            .context
            .set_checkpoint(vk::CommandBuffer::from_raw(cmd as u64), marker);
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_diagnostics_set_tagged_checkpoint(
    handle: *mut NvxDiagnosticsHandle,
    cmd: *mut c_void,
    tag: u32,
) {
    let Some(handle) = handle.as_ref() else {
        return;
    };
    if let Some(tag) = CheckpointTag::from_value(tag as u64) {
        handle
            .context
            .set_tagged_checkpoint(vk::CommandBuffer::from_raw(cmd as u64), tag);
    }
}

/// Config flags for `VkDeviceDiagnosticsConfigCreateInfoNV` with every
/// tracking aid enabled.
#[no_mangle]
pub extern "C" fn nvx_diagnostics_get_full_config_flags() -> u32 {
    DiagnosticsConfigFlags::full().bits()
}

/// Config flags enabling automatic checkpoints only.
#[no_mangle]
pub extern "C" fn nvx_diagnostics_get_minimal_config_flags() -> u32 {
    DiagnosticsConfigFlags::minimal().bits()
}

// --- frame generation ----------------------------------------------------

/// Creates a frame-generation context. Returns null on null arguments or an
/// unrecognized mode value; a device without optical-flow support still
/// yields a (degraded) handle.
#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_init(
    device: *mut c_void,
    width: u32,
    height: u32,
    mode: u32,
    get_device_proc_addr: Option<vk::PFN_vkGetDeviceProcAddr>,
) -> *mut NvxFrameGenHandle {
    let Some(dispatch) = dispatch_for(device, get_device_proc_addr) else {
        return std::ptr::null_mut();
    };
    let Some(mode) = FrameGenMode::from_raw(mode) else {
        return std::ptr::null_mut();
    };
    let context = FrameGenContext::new(FrameGenConfig::new(width, height, mode), None, dispatch);
    Box::into_raw(Box::new(NvxFrameGenHandle { context }))
}

#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_destroy(handle: *mut NvxFrameGenHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_is_supported(handle: *const NvxFrameGenHandle) -> bool {
    handle
        .as_ref()
        .is_some_and(|handle| handle.context.is_supported())
}

#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_set_enabled(
    handle: *mut NvxFrameGenHandle,
    enabled: bool,
) {
    if let Some(handle) = handle.as_mut() {
        handle.context.set_enabled(enabled);
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_set_mode(handle: *mut NvxFrameGenHandle, mode: u32) {
    let Some(handle) = handle.as_mut() else {
        return;
    };
    if let Some(mode) = FrameGenMode::from_raw(mode) {
        handle.context.set_mode(mode);
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_get_stats(
    handle: *const NvxFrameGenHandle,
    out: *mut NvxFrameGenStats,
) {
    let Some(out) = out.as_mut() else {
        return;
    };
    *out = match handle.as_ref() {
        Some(handle) => {
            let stats = handle.context.stats();
            NvxFrameGenStats {
                generated_frames: stats.generated_frames,
                skipped_frames: stats.skipped_frames,
                avg_gen_time_us: stats.avg_gen_time_us,
                confidence: stats.confidence,
                scene_change_detected: stats.scene_change_detected,
            }
        }
        None => NvxFrameGenStats::default(),
    };
}

#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_get_latency_compensation(
    handle: *const NvxFrameGenHandle,
) -> u64 {
    match handle.as_ref() {
        Some(handle) => handle.context.get_latency_compensation(),
        None => 0,
    }
}

#[no_mangle]
pub unsafe extern "C" fn nvx_frame_gen_get_current_frame_id(
    handle: *const NvxFrameGenHandle,
) -> u64 {
    match handle.as_ref() {
        Some(handle) => handle.context.current_frame_id(),
        None => 0,
    }
}

// --- info ----------------------------------------------------------------

/// Library version packed as `(major << 16) | (minor << 8) | patch`.
#[no_mangle]
pub extern "C" fn nvx_get_version() -> u32 {
    (VERSION_MAJOR << 16) | (VERSION_MINOR << 8) | VERSION_PATCH
}

#[no_mangle]
pub extern "C" fn nvx_is_nvidia_gpu() -> bool {
    is_nvidia_gpu()
}

#[no_mangle]
pub extern "C" fn nvx_get_low_latency_extension_name() -> *const c_char {
    ash::nv::low_latency2::NAME.as_ptr()
}

#[no_mangle]
pub extern "C" fn nvx_get_diagnostic_checkpoints_extension_name() -> *const c_char {
    ash::nv::device_diagnostic_checkpoints::NAME.as_ptr()
}

#[no_mangle]
pub extern "C" fn nvx_get_diagnostics_config_extension_name() -> *const c_char {
    ash::nv::device_diagnostics_config::NAME.as_ptr()
}

#[no_mangle]
pub extern "C" fn nvx_get_optical_flow_extension_name() -> *const c_char {
    ash::nv::optical_flow::NAME.as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::null_gdpa;
    use std::ffi::CStr;
    use std::ptr;

    // The null device below is only a key for dispatch resolution; the stub
    // proc-addr resolver never dereferences it.
    const FAKE_DEVICE: *mut c_void = 0x1000 as *mut c_void;

    #[test]
    fn version_packing() {
        assert_eq!(nvx_get_version(), (0 << 16) | (1 << 8) | 0);
    }

    #[test]
    fn extension_names_are_stable_c_strings() {
        unsafe {
            let name = CStr::from_ptr(nvx_get_low_latency_extension_name());
            assert_eq!(name.to_str().unwrap(), "VK_NV_low_latency2");
            let name = CStr::from_ptr(nvx_get_optical_flow_extension_name());
            assert_eq!(name.to_str().unwrap(), "VK_NV_optical_flow");
            let name = CStr::from_ptr(nvx_get_diagnostic_checkpoints_extension_name());
            assert_eq!(name.to_str().unwrap(), "VK_NV_device_diagnostic_checkpoints");
            let name = CStr::from_ptr(nvx_get_diagnostics_config_extension_name());
            assert_eq!(name.to_str().unwrap(), "VK_NV_device_diagnostics_config");
        }
    }

    #[test]
    fn null_arguments_yield_null_handles() {
        unsafe {
            assert!(nvx_low_latency_init(ptr::null_mut(), 0, Some(null_gdpa)).is_null());
            assert!(nvx_low_latency_init(FAKE_DEVICE, 0, None).is_null());
            assert!(nvx_diagnostics_init(ptr::null_mut(), Some(null_gdpa)).is_null());
            assert!(nvx_frame_gen_init(FAKE_DEVICE, 1920, 1080, 99, Some(null_gdpa)).is_null());
        }
    }

    #[test]
    fn null_handles_are_tolerated() {
        unsafe {
            assert!(!nvx_low_latency_is_supported(ptr::null()));
            assert_eq!(
                nvx_low_latency_enable(ptr::null_mut(), false, 0),
                NvxResult::InvalidHandle
            );
            assert_eq!(nvx_low_latency_begin_frame(ptr::null_mut()), 0);
            nvx_low_latency_set_marker(ptr::null_mut(), NVX_MARKER_INPUT_SAMPLE);
            nvx_low_latency_destroy(ptr::null_mut());

            assert!(!nvx_diagnostics_is_supported(ptr::null()));
            nvx_diagnostics_destroy(ptr::null_mut());

            assert_eq!(nvx_frame_gen_get_latency_compensation(ptr::null()), 0);
            let mut stats = NvxFrameGenStats {
                generated_frames: 7,
                ..Default::default()
            };
            nvx_frame_gen_get_stats(ptr::null(), &mut stats);
            assert_eq!(stats.generated_frames, 0);
            nvx_frame_gen_destroy(ptr::null_mut());
        }
    }

    #[test]
    fn low_latency_lifecycle_without_extension() {
        unsafe {
            let handle = nvx_low_latency_init(FAKE_DEVICE, 0, Some(null_gdpa));
            assert!(!handle.is_null());
            assert!(!nvx_low_latency_is_supported(handle));
            assert_eq!(
                nvx_low_latency_enable(handle, true, 0),
                NvxResult::NotSupported
            );

            assert_eq!(nvx_low_latency_begin_frame(handle), 1);
            nvx_low_latency_end_simulation(handle);
            nvx_low_latency_begin_render_submit(handle);
            nvx_low_latency_end_render_submit(handle);
            nvx_low_latency_begin_present(handle);
            nvx_low_latency_end_present(handle);
            assert_eq!(nvx_low_latency_begin_frame(handle), 2);
            assert_eq!(nvx_low_latency_get_current_frame_id(handle), 2);

            let mut timings = [FrameTimings::default(); 8];
            assert_eq!(
                nvx_low_latency_get_timings(handle, timings.as_mut_ptr(), 8),
                0
            );
            nvx_low_latency_destroy(handle);
        }
    }

    #[test]
    fn frame_gen_lifecycle_without_extension() {
        unsafe {
            let handle = nvx_frame_gen_init(FAKE_DEVICE, 1920, 1080, 1, Some(null_gdpa));
            assert!(!handle.is_null());
            assert!(!nvx_frame_gen_is_supported(handle));

            nvx_frame_gen_set_mode(handle, 2);
            nvx_frame_gen_set_enabled(handle, true);
            assert_eq!(nvx_frame_gen_get_current_frame_id(handle), 0);

            let mut stats = NvxFrameGenStats::default();
            nvx_frame_gen_get_stats(handle, &mut stats);
            assert_eq!(stats.generated_frames, 0);
            assert!(nvx_frame_gen_get_latency_compensation(handle) > 0);
            nvx_frame_gen_destroy(handle);
        }
    }

    #[test]
    fn diagnostics_config_flag_values() {
        assert_eq!(nvx_diagnostics_get_full_config_flags(), 0xF);
        assert_eq!(nvx_diagnostics_get_minimal_config_flags(), 0x4);
    }
}
