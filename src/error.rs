use ash::vk;

/// Error type for every fallible operation in this crate.
///
/// Marker stamping and statistics reads never produce one of these; they
/// degrade to no-ops or zero results when the underlying extension is
/// absent. Construction entry points return `Option`/null instead, so a
/// host can fall through to its non-accelerated path without branching on
/// error kinds.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NvxError {
    #[error("required extension entry points are not present on this device")]
    ExtensionNotPresent,
    #[error("context handle is null or invalid")]
    InvalidHandle,
    #[error("frame history holds fewer than two frames")]
    InsufficientFrames,
    #[error("stage has not been initialized")]
    NotInitialized,
    #[error("device lost")]
    DeviceLost,
    #[error("out of host memory")]
    OutOfHostMemory,
    #[error("out of device memory")]
    OutOfDeviceMemory,
    #[error("initialization failed")]
    InitializationFailed,
    #[error("memory map failed")]
    MemoryMapFailed,
    #[error("format not supported")]
    FormatNotSupported,
    #[error("descriptor pool fragmented")]
    FragmentedPool,
    #[error("surface lost")]
    SurfaceLost,
    #[error("native window in use")]
    NativeWindowInUse,
    #[error("swapchain out of date")]
    OutOfDate,
    #[error("failed to open the Vulkan runtime: {0}")]
    LoaderError(String),
    #[error("entry point not found: {0}")]
    FunctionNotFound(&'static str),
    #[error("driver identity string is malformed")]
    ParseError,
    #[error("unknown driver error")]
    Unknown,
}

pub type Result<T, E = NvxError> = core::result::Result<T, E>;

impl From<vk::Result> for NvxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => Self::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            vk::Result::ERROR_INITIALIZATION_FAILED => Self::InitializationFailed,
            vk::Result::ERROR_MEMORY_MAP_FAILED => Self::MemoryMapFailed,
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED => Self::FormatNotSupported,
            vk::Result::ERROR_FRAGMENTED_POOL => Self::FragmentedPool,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => Self::NativeWindowInUse,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => Self::ExtensionNotPresent,
            _ => Self::Unknown,
        }
    }
}

pub(crate) fn check_vk(result: vk::Result) -> Result<()> {
    if result == vk::Result::SUCCESS {
        Ok(())
    } else {
        Err(result.into())
    }
}
