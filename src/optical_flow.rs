//! `VK_NV_optical_flow` session wrapper.
//!
//! A session estimates per-block motion between two images entirely on the
//! optical-flow hardware unit. The caller binds images to the session's
//! binding points, then records the estimation onto its own command buffer
//! with [`OpticalFlowSession::execute`].

use std::ptr;
use std::sync::Arc;

use ash::vk;
use glam::UVec2;
use log::info;

use crate::error::{check_vk, NvxError, Result};
use crate::loader::DeviceDispatch;

/// Output granularity: one motion vector per `N`×`N` pixel block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowGridSize {
    Grid1,
    Grid2,
    Grid4,
    Grid8,
}

impl FlowGridSize {
    /// Block edge length in pixels.
    pub fn cell(self) -> u32 {
        match self {
            FlowGridSize::Grid1 => 1,
            FlowGridSize::Grid2 => 2,
            FlowGridSize::Grid4 => 4,
            FlowGridSize::Grid8 => 8,
        }
    }

    fn to_vk(self) -> vk::OpticalFlowGridSizeFlagsNV {
        match self {
            FlowGridSize::Grid1 => vk::OpticalFlowGridSizeFlagsNV::TYPE_1X1,
            FlowGridSize::Grid2 => vk::OpticalFlowGridSizeFlagsNV::TYPE_2X2,
            FlowGridSize::Grid4 => vk::OpticalFlowGridSizeFlagsNV::TYPE_4X4,
            FlowGridSize::Grid8 => vk::OpticalFlowGridSizeFlagsNV::TYPE_8X8,
        }
    }
}

/// Estimation speed/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPerformanceLevel {
    Slow,
    Medium,
    Fast,
}

impl FlowPerformanceLevel {
    fn to_vk(self) -> vk::OpticalFlowPerformanceLevelNV {
        match self {
            FlowPerformanceLevel::Slow => vk::OpticalFlowPerformanceLevelNV::SLOW,
            FlowPerformanceLevel::Medium => vk::OpticalFlowPerformanceLevelNV::MEDIUM,
            FlowPerformanceLevel::Fast => vk::OpticalFlowPerformanceLevelNV::FAST,
        }
    }
}

/// Session binding points an image can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowBindingPoint {
    Input,
    Reference,
    Hint,
    FlowVector,
    BackwardFlowVector,
    Cost,
    BackwardCost,
    GlobalFlow,
}

impl FlowBindingPoint {
    fn to_vk(self) -> vk::OpticalFlowSessionBindingPointNV {
        match self {
            FlowBindingPoint::Input => vk::OpticalFlowSessionBindingPointNV::INPUT,
            FlowBindingPoint::Reference => vk::OpticalFlowSessionBindingPointNV::REFERENCE,
            FlowBindingPoint::Hint => vk::OpticalFlowSessionBindingPointNV::HINT,
            FlowBindingPoint::FlowVector => vk::OpticalFlowSessionBindingPointNV::FLOW_VECTOR,
            FlowBindingPoint::BackwardFlowVector => {
                vk::OpticalFlowSessionBindingPointNV::BACKWARD_FLOW_VECTOR
            }
            FlowBindingPoint::Cost => vk::OpticalFlowSessionBindingPointNV::COST,
            FlowBindingPoint::BackwardCost => vk::OpticalFlowSessionBindingPointNV::BACKWARD_COST,
            FlowBindingPoint::GlobalFlow => vk::OpticalFlowSessionBindingPointNV::GLOBAL_FLOW,
        }
    }

    fn bit(self) -> u8 {
        1 << match self {
            FlowBindingPoint::Input => 0,
            FlowBindingPoint::Reference => 1,
            FlowBindingPoint::Hint => 2,
            FlowBindingPoint::FlowVector => 3,
            FlowBindingPoint::BackwardFlowVector => 4,
            FlowBindingPoint::Cost => 5,
            FlowBindingPoint::BackwardCost => 6,
            FlowBindingPoint::GlobalFlow => 7,
        }
    }
}

/// Session creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct OpticalFlowConfig {
    pub width: u32,
    pub height: u32,
    pub grid: FlowGridSize,
    pub performance: FlowPerformanceLevel,
    pub bidirectional: bool,
    pub cost_enabled: bool,
    pub image_format: vk::Format,
}

impl OpticalFlowConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            grid: FlowGridSize::Grid4,
            performance: FlowPerformanceLevel::Fast,
            bidirectional: false,
            cost_enabled: false,
            image_format: vk::Format::B8G8R8A8_UNORM,
        }
    }

    /// Motion-vector image dimensions for this config (ceil division by the
    /// grid cell).
    pub fn flow_dimensions(&self) -> UVec2 {
        let cell = self.grid.cell();
        UVec2 {
            x: self.width.div_ceil(cell),
            y: self.height.div_ceil(cell),
        }
    }
}

/// A driver-allocated optical-flow estimation session.
pub struct OpticalFlowSession {
    dispatch: Arc<DeviceDispatch>,
    session: vk::OpticalFlowSessionNV,
    config: OpticalFlowConfig,
    bound: u8,
}

impl OpticalFlowSession {
    /// Creates a session, or fails with [`NvxError::ExtensionNotPresent`]
    /// when the device lacks the extension.
    pub fn create(dispatch: Arc<DeviceDispatch>, config: OpticalFlowConfig) -> Result<Self> {
        let Some(create_session) = dispatch.create_optical_flow_session_nv else {
            return Err(NvxError::ExtensionNotPresent);
        };

        let mut flags = vk::OpticalFlowSessionCreateFlagsNV::empty();
        if config.bidirectional {
            flags |= vk::OpticalFlowSessionCreateFlagsNV::BOTH_DIRECTIONS;
        }
        if config.cost_enabled {
            flags |= vk::OpticalFlowSessionCreateFlagsNV::ENABLE_COST;
        }

        let info = vk::OpticalFlowSessionCreateInfoNV::default()
            .width(config.width)
            .height(config.height)
            .image_format(config.image_format)
            .flow_vector_format(vk::Format::R16G16_S10_5_NV)
            .cost_format(if config.cost_enabled {
                vk::Format::R32_UINT
            } else {
                vk::Format::UNDEFINED
            })
            .output_grid_size(config.grid.to_vk())
            .hint_grid_size(vk::OpticalFlowGridSizeFlagsNV::UNKNOWN)
            .performance_level(config.performance.to_vk())
            .flags(flags);

        let mut session = vk::OpticalFlowSessionNV::null();
        check_vk(unsafe {
            create_session(dispatch.device(), &info, ptr::null(), &mut session)
        })?;
        info!(
            "optical-flow session created: {}x{} grid {} performance {:?}",
            config.width,
            config.height,
            config.grid.cell(),
            config.performance
        );

        Ok(Self {
            dispatch,
            session,
            config,
            bound: 0,
        })
    }

    pub fn config(&self) -> &OpticalFlowConfig {
        &self.config
    }

    /// Attaches `view` to a session binding point.
    pub fn bind_image(
        &mut self,
        point: FlowBindingPoint,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Result<()> {
        let Some(bind) = self.dispatch.bind_optical_flow_session_image_nv else {
            return Err(NvxError::ExtensionNotPresent);
        };
        check_vk(unsafe {
            bind(
                self.dispatch.device(),
                self.session,
                point.to_vk(),
                view,
                layout,
            )
        })?;
        self.bound |= point.bit();
        Ok(())
    }

    fn required_bindings(&self) -> u8 {
        let mut required = FlowBindingPoint::Input.bit()
            | FlowBindingPoint::Reference.bit()
            | FlowBindingPoint::FlowVector.bit();
        if self.config.bidirectional {
            required |= FlowBindingPoint::BackwardFlowVector.bit();
        }
        if self.config.cost_enabled {
            required |= FlowBindingPoint::Cost.bit();
            if self.config.bidirectional {
                required |= FlowBindingPoint::BackwardCost.bit();
            }
        }
        required
    }

    /// Records the estimation onto `cmd`. `regions` of `None` estimates the
    /// whole frame. Fails with [`NvxError::NotInitialized`] while a required
    /// binding point is unbound.
    pub fn execute(
        &self,
        cmd: vk::CommandBuffer,
        regions: Option<&[vk::Rect2D]>,
        disable_temporal_hints: bool,
    ) -> Result<()> {
        let Some(execute) = self.dispatch.cmd_optical_flow_execute_nv else {
            return Err(NvxError::ExtensionNotPresent);
        };
        let required = self.required_bindings();
        if self.bound & required != required {
            return Err(NvxError::NotInitialized);
        }

        let flags = if disable_temporal_hints {
            vk::OpticalFlowExecuteFlagsNV::DISABLE_TEMPORAL_HINTS
        } else {
            vk::OpticalFlowExecuteFlagsNV::empty()
        };
        let mut info = vk::OpticalFlowExecuteInfoNV::default().flags(flags);
        if let Some(regions) = regions {
            info = info.regions(regions);
        }
        unsafe { execute(cmd, self.session, &info) };
        Ok(())
    }
}

impl Drop for OpticalFlowSession {
    fn drop(&mut self) {
        if self.session == vk::OpticalFlowSessionNV::null() {
            return;
        }
        if let Some(destroy) = self.dispatch.destroy_optical_flow_session_nv {
            unsafe { destroy(self.dispatch.device(), self.session, ptr::null()) };
        }
    }
}

unsafe impl Send for OpticalFlowSession {}
