//! GPU crash diagnostics via `VK_NV_device_diagnostic_checkpoints` and
//! `VK_NV_device_diagnostics_config`.
//!
//! Checkpoints are opaque marker pointers the driver records as the GPU
//! reaches them; after a device-lost event the last-reached markers can be
//! read back per queue. [`CheckpointTag`] packs a small enumerated operation
//! tag into the marker pointer so dumps stay readable without a side table.

use std::ffi::c_void;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ash::vk;
use log::{info, trace};

use crate::loader::DeviceDispatch;

/// Predefined checkpoint tags for common command-buffer operations.
///
/// Values are stable 16-bit codes grouped by operation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CheckpointTag {
    FrameStart = 0x1000,
    FrameEnd = 0x1001,
    DrawStart = 0x2000,
    DrawEnd = 0x2001,
    ComputeStart = 0x3000,
    ComputeEnd = 0x3001,
    TransferStart = 0x4000,
    TransferEnd = 0x4001,
    RenderPassBegin = 0x5000,
    RenderPassEnd = 0x5001,
    BindPipeline = 0x6000,
    BindDescriptorSet = 0x6001,
    BindVertexBuffer = 0x6002,
    BindIndexBuffer = 0x6003,
    PushConstants = 0x6004,
    Barrier = 0x7000,
    Clear = 0x7001,
    Copy = 0x7002,
    Blit = 0x7003,
    Resolve = 0x7004,
    QueryBegin = 0x8000,
    QueryEnd = 0x8001,
    Timestamp = 0x8002,
    DebugMarkerBegin = 0x9000,
    DebugMarkerEnd = 0x9001,
}

impl CheckpointTag {
    pub const ALL: [CheckpointTag; 25] = [
        CheckpointTag::FrameStart,
        CheckpointTag::FrameEnd,
        CheckpointTag::DrawStart,
        CheckpointTag::DrawEnd,
        CheckpointTag::ComputeStart,
        CheckpointTag::ComputeEnd,
        CheckpointTag::TransferStart,
        CheckpointTag::TransferEnd,
        CheckpointTag::RenderPassBegin,
        CheckpointTag::RenderPassEnd,
        CheckpointTag::BindPipeline,
        CheckpointTag::BindDescriptorSet,
        CheckpointTag::BindVertexBuffer,
        CheckpointTag::BindIndexBuffer,
        CheckpointTag::PushConstants,
        CheckpointTag::Barrier,
        CheckpointTag::Clear,
        CheckpointTag::Copy,
        CheckpointTag::Blit,
        CheckpointTag::Resolve,
        CheckpointTag::QueryBegin,
        CheckpointTag::QueryEnd,
        CheckpointTag::Timestamp,
        CheckpointTag::DebugMarkerBegin,
        CheckpointTag::DebugMarkerEnd,
    ];

    pub fn from_value(value: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| *tag as u64 == value)
    }
}

/// A checkpoint marker pointer that may carry an encoded [`CheckpointTag`].
///
/// The wire representation across the driver boundary is a machine-word
/// opaque integer; this newtype keeps raw host pointers and encoded tags
/// from being treated interchangeably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagPointer(*const c_void);

impl TagPointer {
    pub fn from_tag(tag: CheckpointTag) -> Self {
        Self(tag as u16 as usize as *const c_void)
    }

    pub fn from_raw(ptr: *const c_void) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *const c_void {
        self.0
    }

    /// Recovers the tag if the pointer value falls in the tag range.
    pub fn decode(self) -> Option<CheckpointTag> {
        CheckpointTag::from_value(self.0 as usize as u64)
    }
}

/// Coarse pipeline position decoded from the driver's stage bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    TopOfPipe,
    DrawIndirect,
    VertexInput,
    VertexShader,
    FragmentShader,
    ComputeShader,
    Transfer,
    BottomOfPipe,
    AllGraphics,
    AllCommands,
    Unknown,
}

impl PipelineStage {
    /// Picks the most specific known stage set in `flags`.
    pub fn from_flags(flags: vk::PipelineStageFlags) -> Self {
        const PRIORITY: [(vk::PipelineStageFlags, PipelineStage); 10] = [
            (
                vk::PipelineStageFlags::COMPUTE_SHADER,
                PipelineStage::ComputeShader,
            ),
            (
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                PipelineStage::FragmentShader,
            ),
            (
                vk::PipelineStageFlags::VERTEX_SHADER,
                PipelineStage::VertexShader,
            ),
            (
                vk::PipelineStageFlags::VERTEX_INPUT,
                PipelineStage::VertexInput,
            ),
            (
                vk::PipelineStageFlags::DRAW_INDIRECT,
                PipelineStage::DrawIndirect,
            ),
            (vk::PipelineStageFlags::TRANSFER, PipelineStage::Transfer),
            (
                vk::PipelineStageFlags::TOP_OF_PIPE,
                PipelineStage::TopOfPipe,
            ),
            (
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                PipelineStage::BottomOfPipe,
            ),
            (
                vk::PipelineStageFlags::ALL_GRAPHICS,
                PipelineStage::AllGraphics,
            ),
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                PipelineStage::AllCommands,
            ),
        ];
        PRIORITY
            .into_iter()
            .find(|(flag, _)| flags.contains(*flag))
            .map(|(_, stage)| stage)
            .unwrap_or(PipelineStage::Unknown)
    }

    pub fn name(self) -> &'static str {
        match self {
            PipelineStage::TopOfPipe => "top of pipe",
            PipelineStage::DrawIndirect => "draw indirect",
            PipelineStage::VertexInput => "vertex input",
            PipelineStage::VertexShader => "vertex shader",
            PipelineStage::FragmentShader => "fragment shader",
            PipelineStage::ComputeShader => "compute shader",
            PipelineStage::Transfer => "transfer",
            PipelineStage::BottomOfPipe => "bottom of pipe",
            PipelineStage::AllGraphics => "all graphics",
            PipelineStage::AllCommands => "all commands",
            PipelineStage::Unknown => "unknown",
        }
    }
}

/// One checkpoint retrieved from a queue after device loss.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointData {
    pub stage: PipelineStage,
    pub marker: *const c_void,
    /// Populated only when `marker` decodes to a known tag.
    pub tag: Option<CheckpointTag>,
}

bitflags::bitflags! {
    /// `VK_NV_device_diagnostics_config` flags chained into device creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DiagnosticsConfigFlags: u32 {
        const SHADER_DEBUG_INFO = 0x0000_0001;
        const RESOURCE_TRACKING = 0x0000_0002;
        const AUTOMATIC_CHECKPOINTS = 0x0000_0004;
        const SHADER_ERROR_REPORTING = 0x0000_0008;
    }
}

impl DiagnosticsConfigFlags {
    /// Every tracking aid; highest overhead.
    pub fn full() -> Self {
        Self::all()
    }

    /// Automatic checkpoints only; lowest overhead.
    pub fn minimal() -> Self {
        Self::AUTOMATIC_CHECKPOINTS
    }
}

/// Per-device checkpoint stamping and post-mortem retrieval.
pub struct DiagnosticsContext {
    dispatch: Arc<DeviceDispatch>,
}

impl DiagnosticsContext {
    pub fn new(dispatch: Arc<DeviceDispatch>) -> Self {
        Self { dispatch }
    }

    pub fn is_supported(&self) -> bool {
        self.dispatch.has_diagnostic_checkpoints()
    }

    /// Inserts a raw checkpoint marker. Silent no-op when the extension is
    /// absent.
    pub fn set_checkpoint(&self, cmd: vk::CommandBuffer, marker: *const c_void) {
        let Some(set_checkpoint) = self.dispatch.cmd_set_checkpoint_nv else {
            return;
        };
        unsafe { set_checkpoint(cmd, marker) };
    }

    /// Inserts a checkpoint carrying an encoded [`CheckpointTag`].
    pub fn set_tagged_checkpoint(&self, cmd: vk::CommandBuffer, tag: CheckpointTag) {
        trace!("checkpoint {tag:?}");
        self.set_checkpoint(cmd, TagPointer::from_tag(tag).as_ptr());
    }

    /// Retrieves the last-reached checkpoints on `queue`. Expected to be
    /// called after a device-lost event; returns an empty list when the
    /// extension is absent or nothing was recorded.
    pub fn get_checkpoints(&self, queue: vk::Queue) -> Vec<CheckpointData> {
        let Some(get_checkpoint_data) = self.dispatch.get_queue_checkpoint_data_nv else {
            return Vec::new();
        };

        let mut count = 0u32;
        unsafe { get_checkpoint_data(queue, &mut count, ptr::null_mut()) };
        if count == 0 {
            return Vec::new();
        }

        let mut raw = vec![vk::CheckpointDataNV::default(); count as usize];
        unsafe { get_checkpoint_data(queue, &mut count, raw.as_mut_ptr()) };
        raw.truncate(count as usize);

        raw.iter()
            .map(|data| {
                let marker = data.p_checkpoint_marker as *const c_void;
                CheckpointData {
                    stage: PipelineStage::from_flags(data.stage),
                    marker,
                    tag: TagPointer::from_raw(marker).decode(),
                }
            })
            .collect()
    }
}

/// Snapshot of a queue's checkpoints plus a wall-clock timestamp, formatted
/// for bug reports.
pub struct CrashDump {
    pub timestamp: SystemTime,
    pub checkpoints: Vec<CheckpointData>,
}

impl CrashDump {
    pub fn generate(diagnostics: &DiagnosticsContext, queue: vk::Queue) -> Self {
        let checkpoints = diagnostics.get_checkpoints(queue);
        info!("crash dump captured, {} checkpoints", checkpoints.len());
        Self {
            timestamp: SystemTime::now(),
            checkpoints,
        }
    }

    /// Stage of the chronologically last checkpoint, or unknown when empty.
    pub fn last_stage(&self) -> PipelineStage {
        self.checkpoints
            .last()
            .map(|data| data.stage)
            .unwrap_or(PipelineStage::Unknown)
    }

    /// Tag of the chronologically last checkpoint, if it carried one.
    pub fn last_tag(&self) -> Option<CheckpointTag> {
        self.checkpoints.last().and_then(|data| data.tag)
    }

    /// Renders the dump as a human-readable report.
    pub fn format(&self) -> String {
        let epoch_secs = self
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);

        let mut report = String::new();
        let _ = writeln!(report, "=== GPU crash dump ===");
        let _ = writeln!(report, "captured at: {epoch_secs} (unix seconds)");
        let _ = writeln!(report, "checkpoints: {}", self.checkpoints.len());
        let _ = writeln!(report, "last stage:  {}", self.last_stage().name());
        match self.last_tag() {
            Some(tag) => {
                let _ = writeln!(report, "last tag:    {tag:?}");
            }
            None => {
                let _ = writeln!(report, "last tag:    none");
            }
        }
        for (index, data) in self.checkpoints.iter().enumerate() {
            match data.tag {
                Some(tag) => {
                    let _ = writeln!(
                        report,
                        "  [{index}] {:<16} {tag:?}",
                        data.stage.name()
                    );
                }
                None => {
                    let _ = writeln!(
                        report,
                        "  [{index}] {:<16} marker={:#x}",
                        data.stage.name(),
                        data.marker as usize
                    );
                }
            }
        }
        report
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.format())
    }
}
