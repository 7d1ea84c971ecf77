//! Vulkan runtime loading and per-device dispatch tables.
//!
//! Everything downstream of this module calls the driver exclusively through
//! a [`DeviceDispatch`], a record of optional entry points resolved once per
//! device via `vkGetDeviceProcAddr`. A missing extension shows up as `None`
//! slots and false feature predicates, never as a crash.

use std::ffi::CStr;
use std::fmt;
use std::fs;
use std::mem;
use std::path::Path;

use ash::vk;
use log::{debug, info};

use crate::error::{NvxError, Result};

/// Shared-object names probed by [`VulkanLibrary::open`], most specific first.
const VULKAN_RUNTIME_CANDIDATES: &[&str] = &["libvulkan.so.1", "libvulkan.so"];

/// Default location of the NVIDIA kernel-module identity text.
pub const DRIVER_VERSION_PATH: &str = "/proc/driver/nvidia/version";

/// Oldest driver release known to expose the full extension surface.
pub const RECOMMENDED_DRIVER_VERSION: DriverVersion = DriverVersion {
    major: 590,
    minor: 48,
    patch: 1,
};

/// A dynamically opened Vulkan runtime.
pub struct VulkanLibrary {
    _library: libloading::Library,
    get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
}

impl VulkanLibrary {
    /// Opens the platform Vulkan runtime and resolves `vkGetInstanceProcAddr`.
    pub fn open() -> Result<Self> {
        let mut last_error = None;
        for name in VULKAN_RUNTIME_CANDIDATES {
            match unsafe { libloading::Library::new(name) } {
                Ok(library) => {
                    let get_instance_proc_addr = unsafe {
                        *library
                            .get::<vk::PFN_vkGetInstanceProcAddr>(b"vkGetInstanceProcAddr\0")
                            .map_err(|_| NvxError::FunctionNotFound("vkGetInstanceProcAddr"))?
                    };
                    info!("opened Vulkan runtime {name}");
                    return Ok(Self {
                        _library: library,
                        get_instance_proc_addr,
                    });
                }
                Err(err) => last_error = Some(err.to_string()),
            }
        }
        Err(NvxError::LoaderError(
            last_error.unwrap_or_else(|| "no candidate shared object".into()),
        ))
    }

    /// Resolves an instance-level (or, with a null instance, global) entry point.
    pub fn get_instance_proc(
        &self,
        instance: vk::Instance,
        name: &CStr,
    ) -> vk::PFN_vkVoidFunction {
        unsafe { (self.get_instance_proc_addr)(instance, name.as_ptr()) }
    }

    /// The raw `vkGetInstanceProcAddr` this library resolved.
    pub fn get_instance_proc_addr(&self) -> vk::PFN_vkGetInstanceProcAddr {
        self.get_instance_proc_addr
    }
}

unsafe fn load<F>(
    get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr,
    device: vk::Device,
    name: &CStr,
) -> Option<F> {
    let raw = get_device_proc_addr(device, name.as_ptr())?;
    // Sound for any `F` that is an `extern "system"` fn pointer type of the
    // entry point named `name`; every call site below pairs name and type.
    Some(mem::transmute_copy(&raw))
}

/// Device-level entry points for the supported extension surface, plus the
/// core entry points the frame-synthesis stage records through.
///
/// A slot is either `None` or callable for the lifetime of the owning
/// device. Feature predicates are pure conjunctions over the slots an
/// extension surface requires.
pub struct DeviceDispatch {
    device: vk::Device,

    // VK_NV_low_latency2
    pub(crate) set_latency_sleep_mode_nv: Option<vk::PFN_vkSetLatencySleepModeNV>,
    pub(crate) latency_sleep_nv: Option<vk::PFN_vkLatencySleepNV>,
    pub(crate) set_latency_marker_nv: Option<vk::PFN_vkSetLatencyMarkerNV>,
    pub(crate) get_latency_timings_nv: Option<vk::PFN_vkGetLatencyTimingsNV>,

    // VK_NV_device_diagnostic_checkpoints
    pub(crate) cmd_set_checkpoint_nv: Option<vk::PFN_vkCmdSetCheckpointNV>,
    pub(crate) get_queue_checkpoint_data_nv: Option<vk::PFN_vkGetQueueCheckpointDataNV>,

    // VK_NV_optical_flow
    pub(crate) create_optical_flow_session_nv: Option<vk::PFN_vkCreateOpticalFlowSessionNV>,
    pub(crate) destroy_optical_flow_session_nv: Option<vk::PFN_vkDestroyOpticalFlowSessionNV>,
    pub(crate) bind_optical_flow_session_image_nv:
        Option<vk::PFN_vkBindOpticalFlowSessionImageNV>,
    pub(crate) cmd_optical_flow_execute_nv: Option<vk::PFN_vkCmdOpticalFlowExecuteNV>,

    // Core device entry points used by frame synthesis.
    pub(crate) create_shader_module: Option<vk::PFN_vkCreateShaderModule>,
    pub(crate) destroy_shader_module: Option<vk::PFN_vkDestroyShaderModule>,
    pub(crate) create_descriptor_set_layout: Option<vk::PFN_vkCreateDescriptorSetLayout>,
    pub(crate) destroy_descriptor_set_layout: Option<vk::PFN_vkDestroyDescriptorSetLayout>,
    pub(crate) create_pipeline_layout: Option<vk::PFN_vkCreatePipelineLayout>,
    pub(crate) destroy_pipeline_layout: Option<vk::PFN_vkDestroyPipelineLayout>,
    pub(crate) create_compute_pipelines: Option<vk::PFN_vkCreateComputePipelines>,
    pub(crate) destroy_pipeline: Option<vk::PFN_vkDestroyPipeline>,
    pub(crate) create_descriptor_pool: Option<vk::PFN_vkCreateDescriptorPool>,
    pub(crate) destroy_descriptor_pool: Option<vk::PFN_vkDestroyDescriptorPool>,
    pub(crate) allocate_descriptor_sets: Option<vk::PFN_vkAllocateDescriptorSets>,
    pub(crate) update_descriptor_sets: Option<vk::PFN_vkUpdateDescriptorSets>,
    pub(crate) create_sampler: Option<vk::PFN_vkCreateSampler>,
    pub(crate) destroy_sampler: Option<vk::PFN_vkDestroySampler>,
    pub(crate) cmd_bind_pipeline: Option<vk::PFN_vkCmdBindPipeline>,
    pub(crate) cmd_bind_descriptor_sets: Option<vk::PFN_vkCmdBindDescriptorSets>,
    pub(crate) cmd_push_constants: Option<vk::PFN_vkCmdPushConstants>,
    pub(crate) cmd_dispatch: Option<vk::PFN_vkCmdDispatch>,
    pub(crate) cmd_pipeline_barrier: Option<vk::PFN_vkCmdPipelineBarrier>,
}

impl DeviceDispatch {
    /// Resolves the fixed entry-point list for `device`.
    ///
    /// Missing names simply yield `None` slots; construction never fails.
    pub fn new(device: vk::Device, get_device_proc_addr: vk::PFN_vkGetDeviceProcAddr) -> Self {
        macro_rules! resolve {
            ($name:literal) => {
                unsafe { load(get_device_proc_addr, device, $name) }
            };
        }

        let dispatch = Self {
            device,
            set_latency_sleep_mode_nv: resolve!(c"vkSetLatencySleepModeNV"),
            latency_sleep_nv: resolve!(c"vkLatencySleepNV"),
            set_latency_marker_nv: resolve!(c"vkSetLatencyMarkerNV"),
            get_latency_timings_nv: resolve!(c"vkGetLatencyTimingsNV"),
            cmd_set_checkpoint_nv: resolve!(c"vkCmdSetCheckpointNV"),
            get_queue_checkpoint_data_nv: resolve!(c"vkGetQueueCheckpointDataNV"),
            create_optical_flow_session_nv: resolve!(c"vkCreateOpticalFlowSessionNV"),
            destroy_optical_flow_session_nv: resolve!(c"vkDestroyOpticalFlowSessionNV"),
            bind_optical_flow_session_image_nv: resolve!(c"vkBindOpticalFlowSessionImageNV"),
            cmd_optical_flow_execute_nv: resolve!(c"vkCmdOpticalFlowExecuteNV"),
            create_shader_module: resolve!(c"vkCreateShaderModule"),
            destroy_shader_module: resolve!(c"vkDestroyShaderModule"),
            create_descriptor_set_layout: resolve!(c"vkCreateDescriptorSetLayout"),
            destroy_descriptor_set_layout: resolve!(c"vkDestroyDescriptorSetLayout"),
            create_pipeline_layout: resolve!(c"vkCreatePipelineLayout"),
            destroy_pipeline_layout: resolve!(c"vkDestroyPipelineLayout"),
            create_compute_pipelines: resolve!(c"vkCreateComputePipelines"),
            destroy_pipeline: resolve!(c"vkDestroyPipeline"),
            create_descriptor_pool: resolve!(c"vkCreateDescriptorPool"),
            destroy_descriptor_pool: resolve!(c"vkDestroyDescriptorPool"),
            allocate_descriptor_sets: resolve!(c"vkAllocateDescriptorSets"),
            update_descriptor_sets: resolve!(c"vkUpdateDescriptorSets"),
            create_sampler: resolve!(c"vkCreateSampler"),
            destroy_sampler: resolve!(c"vkDestroySampler"),
            cmd_bind_pipeline: resolve!(c"vkCmdBindPipeline"),
            cmd_bind_descriptor_sets: resolve!(c"vkCmdBindDescriptorSets"),
            cmd_push_constants: resolve!(c"vkCmdPushConstants"),
            cmd_dispatch: resolve!(c"vkCmdDispatch"),
            cmd_pipeline_barrier: resolve!(c"vkCmdPipelineBarrier"),
        };

        debug!(
            "device dispatch resolved: low_latency_2={} diagnostic_checkpoints={} optical_flow={}",
            dispatch.has_low_latency_2(),
            dispatch.has_diagnostic_checkpoints(),
            dispatch.has_optical_flow()
        );
        dispatch
    }

    /// The device this table was resolved against.
    pub fn device(&self) -> vk::Device {
        self.device
    }

    /// `VK_NV_low_latency2` is usable.
    pub fn has_low_latency_2(&self) -> bool {
        self.set_latency_sleep_mode_nv.is_some()
            && self.latency_sleep_nv.is_some()
            && self.set_latency_marker_nv.is_some()
            && self.get_latency_timings_nv.is_some()
    }

    /// `VK_NV_device_diagnostic_checkpoints` is usable.
    pub fn has_diagnostic_checkpoints(&self) -> bool {
        self.cmd_set_checkpoint_nv.is_some() && self.get_queue_checkpoint_data_nv.is_some()
    }

    /// `VK_NV_optical_flow` is usable.
    pub fn has_optical_flow(&self) -> bool {
        self.create_optical_flow_session_nv.is_some()
            && self.destroy_optical_flow_session_nv.is_some()
            && self.bind_optical_flow_session_image_nv.is_some()
            && self.cmd_optical_flow_execute_nv.is_some()
    }

    /// The core entry points frame synthesis records through are usable.
    pub(crate) fn has_synthesis_core(&self) -> bool {
        self.create_shader_module.is_some()
            && self.destroy_shader_module.is_some()
            && self.create_descriptor_set_layout.is_some()
            && self.destroy_descriptor_set_layout.is_some()
            && self.create_pipeline_layout.is_some()
            && self.destroy_pipeline_layout.is_some()
            && self.create_compute_pipelines.is_some()
            && self.destroy_pipeline.is_some()
            && self.create_descriptor_pool.is_some()
            && self.destroy_descriptor_pool.is_some()
            && self.allocate_descriptor_sets.is_some()
            && self.update_descriptor_sets.is_some()
            && self.create_sampler.is_some()
            && self.destroy_sampler.is_some()
            && self.cmd_bind_pipeline.is_some()
            && self.cmd_bind_descriptor_sets.is_some()
            && self.cmd_push_constants.is_some()
            && self.cmd_dispatch.is_some()
            && self.cmd_pipeline_barrier.is_some()
    }
}

// Raw handles and fn pointers; the table is immutable after construction.
unsafe impl Send for DeviceDispatch {}
unsafe impl Sync for DeviceDispatch {}

/// NVIDIA driver release triple, parsed from the kernel-module identity text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl DriverVersion {
    /// Extracts the first `MAJOR.MINOR[.PATCH]` token (2–4 digit major) from
    /// the first line of a driver-identity stream.
    pub fn parse(identity: &str) -> Result<Self> {
        let line = identity.lines().next().ok_or(NvxError::ParseError)?;
        let bytes = line.as_bytes();
        for i in 0..bytes.len() {
            if bytes[i].is_ascii_digit() && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric()) {
                if let Some(version) = Self::scan(&line[i..]) {
                    return Ok(version);
                }
            }
        }
        Err(NvxError::ParseError)
    }

    fn scan(text: &str) -> Option<Self> {
        fn digits(text: &str) -> usize {
            text.bytes().take_while(u8::is_ascii_digit).count()
        }

        let major_len = digits(text);
        if !(2..=4).contains(&major_len) {
            return None;
        }
        let rest = text[major_len..].strip_prefix('.')?;
        let minor_len = digits(rest);
        if !(1..=3).contains(&minor_len) {
            return None;
        }

        let major = text[..major_len].parse().ok()?;
        let minor = rest[..minor_len].parse().ok()?;
        let patch = match rest[minor_len..].strip_prefix('.') {
            Some(tail) => {
                let patch_len = digits(tail);
                if (1..=3).contains(&patch_len) {
                    tail[..patch_len].parse().ok()?
                } else {
                    0
                }
            }
            None => 0,
        };

        Some(Self {
            major,
            minor,
            patch,
        })
    }

    /// Reads and parses the identity text at the default platform path.
    pub fn detect() -> Result<Self> {
        Self::detect_from(Path::new(DRIVER_VERSION_PATH))
    }

    /// Reads and parses the identity text at `path`. Absence or malformed
    /// content is reported as [`NvxError::ParseError`] ("version unknown").
    pub fn detect_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|_| NvxError::ParseError)?;
        Self::parse(&text)
    }

    /// Whether this release is at least [`RECOMMENDED_DRIVER_VERSION`].
    pub fn meets_recommended(&self) -> bool {
        *self >= RECOMMENDED_DRIVER_VERSION
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether an NVIDIA kernel module is loaded on this machine.
pub fn is_nvidia_gpu() -> bool {
    DriverVersion::detect().is_ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::ffi::c_char;

    pub(crate) unsafe extern "system" fn null_gdpa(
        _device: vk::Device,
        _name: *const c_char,
    ) -> vk::PFN_vkVoidFunction {
        None
    }

    pub(crate) fn null_dispatch() -> DeviceDispatch {
        DeviceDispatch::new(vk::Device::null(), null_gdpa)
    }

    #[test]
    fn null_dispatch_has_no_features() {
        let dispatch = null_dispatch();
        assert!(!dispatch.has_low_latency_2());
        assert!(!dispatch.has_diagnostic_checkpoints());
        assert!(!dispatch.has_optical_flow());
        assert!(!dispatch.has_synthesis_core());
    }

    #[test]
    fn parse_kernel_module_line() {
        let text = "NVRM version: NVIDIA UNIX x86_64 Kernel Module  590.48.01  Tue Jan 6 03:10:00 UTC 2026\nGCC version: gcc version 14.2.1\n";
        let version = DriverVersion::parse(text).unwrap();
        assert_eq!(
            version,
            DriverVersion {
                major: 590,
                minor: 48,
                patch: 1
            }
        );
        assert!(version.meets_recommended());
    }

    #[test]
    fn parse_two_component_version() {
        let version = DriverVersion::parse("driver 535.183 loaded").unwrap();
        assert_eq!(
            version,
            DriverVersion {
                major: 535,
                minor: 183,
                patch: 0
            }
        );
        assert!(!version.meets_recommended());
    }

    #[test]
    fn parse_skips_short_and_attached_numbers() {
        // "x86_64" must not match: the 64 is glued to an alphanumeric run and
        // a 2-digit major requires a following ".minor".
        let version = DriverVersion::parse("x86_64 build 9.9 -> 570.86.16").unwrap();
        assert_eq!(version.major, 570);
        assert_eq!(version.minor, 86);
        assert_eq!(version.patch, 16);
    }

    #[test]
    fn parse_rejects_versionless_line() {
        assert_eq!(
            DriverVersion::parse("no version here"),
            Err(NvxError::ParseError)
        );
        assert_eq!(DriverVersion::parse(""), Err(NvxError::ParseError));
    }

    #[test]
    fn version_ordering() {
        let old = DriverVersion {
            major: 590,
            minor: 47,
            patch: 99,
        };
        assert!(old < RECOMMENDED_DRIVER_VERSION);
        assert!(!old.meets_recommended());
    }
}
