//! Frame synthesis: motion-compensated interpolation on the GPU.
//!
//! The stage owns the compute pipelines and the descriptor set that drive
//! the warp, blend and disocclusion-fill kernels, and records them onto the
//! caller's command buffer. Shader bytecode and the output storage image are
//! supplied by the host ([`FrameSynthesisContext::install_shaders`] /
//! [`install_output`](FrameSynthesisContext::install_output)); the stage
//! reports [`NvxError::NotInitialized`] until both are in place.
//!
//! All bound images are expected in `GENERAL` layout; layout transitions for
//! caller-owned images are the caller's job.

use std::mem;
use std::ptr;
use std::sync::Arc;

use ash::vk;
use log::{debug, warn};

use crate::error::{check_vk, NvxError, Result};
use crate::loader::DeviceDispatch;
use crate::motion::{FrameImage, MotionVectorBuffers};

/// Descriptor bindings of the synthesis descriptor set. Bindings 0–3 are
/// combined image samplers, 4 is a storage image; all compute-only.
pub const BINDING_INPUT_PREV: u32 = 0;
pub const BINDING_INPUT_CURR: u32 = 1;
pub const BINDING_MOTION_VECTORS: u32 = 2;
pub const BINDING_COST_MAP: u32 = 3;
pub const BINDING_OUTPUT: u32 = 4;

/// Workgroup edge shared by every synthesis kernel.
const WORKGROUP_SIZE: u32 = 8;

/// S10.5 motion vectors carry 1/32 pixel per integer step.
const MV_SCALE: f32 = 1.0 / 32.0;

/// Push constants of the warp kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WarpPushConstants {
    pub mv_scale_x: f32,
    pub mv_scale_y: f32,
    pub interpolation: f32,
    /// +1 warps the previous frame forward, -1 warps the current frame back.
    pub direction: f32,
}

/// Push constants of the linear-blend kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlendPushConstants {
    pub weight: f32,
    pub _pad: [f32; 3],
}

/// Push constants of the cost-weighted blend kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceBlendPushConstants {
    pub interpolation: f32,
    pub cost_scale: f32,
    pub min_confidence: f32,
    pub _pad: f32,
}

/// Push constants of the disocclusion-fill kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OcclusionFillPushConstants {
    pub occlusion_threshold: f32,
    pub fill_radius: f32,
    pub interpolation: f32,
    pub _pad: f32,
}

/// Interpolation pass structure, selected by the frame-generation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisQuality {
    /// Forward warp of the previous frame, linear blend with the current.
    Linear,
    /// Bidirectional warp, linear blend.
    Bidirectional,
    /// Bidirectional warp, cost-weighted blend, disocclusion fill.
    CostWeighted,
}

/// Kernel tuning knobs; the defaults match the shader contract.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisTuning {
    /// Temporal position of the synthesized frame between previous (0) and
    /// current (1).
    pub interpolation: f32,
    pub cost_scale: f32,
    pub min_confidence: f32,
    pub occlusion_threshold: f32,
    pub fill_radius: f32,
}

impl Default for SynthesisTuning {
    fn default() -> Self {
        Self {
            interpolation: 0.5,
            cost_scale: 0.01,
            min_confidence: 0.1,
            occlusion_threshold: 0.5,
            fill_radius: 4.0,
        }
    }
}

/// Host-supplied SPIR-V for the synthesis kernels. Optional entries may be
/// omitted when the selected quality never dispatches them.
#[derive(Clone, Copy)]
pub struct SynthesisShaders<'a> {
    pub forward_warp: &'a [u32],
    pub backward_warp: Option<&'a [u32]>,
    pub blend: &'a [u32],
    pub confidence_blend: Option<&'a [u32]>,
    pub occlusion_fill: Option<&'a [u32]>,
}

impl SynthesisShaders<'_> {
    /// Checks that every kernel `quality` dispatches is present.
    pub fn validate(&self, quality: SynthesisQuality) -> Result<()> {
        let complete = match quality {
            SynthesisQuality::Linear => true,
            SynthesisQuality::Bidirectional => self.backward_warp.is_some(),
            SynthesisQuality::CostWeighted => {
                self.backward_warp.is_some()
                    && self.confidence_blend.is_some()
                    && self.occlusion_fill.is_some()
            }
        };
        if complete {
            Ok(())
        } else {
            Err(NvxError::InitializationFailed)
        }
    }
}

struct PipelineSet {
    forward_warp: vk::Pipeline,
    backward_warp: Option<vk::Pipeline>,
    blend: vk::Pipeline,
    confidence_blend: Option<vk::Pipeline>,
    occlusion_fill: Option<vk::Pipeline>,
}

/// Owns the synthesis pipelines and descriptor machinery for one device.
pub struct FrameSynthesisContext {
    dispatch: Arc<DeviceDispatch>,
    width: u32,
    height: u32,
    quality: SynthesisQuality,
    tuning: SynthesisTuning,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    sampler: vk::Sampler,
    pipelines: Option<PipelineSet>,
    output: Option<FrameImage>,
}

impl FrameSynthesisContext {
    /// Creates the descriptor layout, pool, set, sampler and pipeline layout.
    /// Fails with [`NvxError::ExtensionNotPresent`] when the device dispatch
    /// is missing the required core entry points.
    pub fn new(
        dispatch: Arc<DeviceDispatch>,
        width: u32,
        height: u32,
        quality: SynthesisQuality,
    ) -> Result<Self> {
        if !dispatch.has_synthesis_core() {
            return Err(NvxError::ExtensionNotPresent);
        }

        let mut ctx = Self {
            dispatch,
            width,
            height,
            quality,
            tuning: SynthesisTuning::default(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            sampler: vk::Sampler::null(),
            pipelines: None,
            output: None,
        };
        ctx.create_descriptor_machinery()?;
        debug!("synthesis context created: {width}x{height} {quality:?}");
        Ok(ctx)
    }

    fn create_descriptor_machinery(&mut self) -> Result<()> {
        let device = self.dispatch.device();

        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let bindings = [
            descriptor_binding(BINDING_INPUT_PREV, sampled),
            descriptor_binding(BINDING_INPUT_CURR, sampled),
            descriptor_binding(BINDING_MOTION_VECTORS, sampled),
            descriptor_binding(BINDING_COST_MAP, sampled),
            descriptor_binding(BINDING_OUTPUT, vk::DescriptorType::STORAGE_IMAGE),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let create_set_layout = self
            .dispatch
            .create_descriptor_set_layout
            .ok_or(NvxError::ExtensionNotPresent)?;
        check_vk(unsafe {
            create_set_layout(
                device,
                &layout_info,
                ptr::null(),
                &mut self.descriptor_set_layout,
            )
        })?;

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(mem::size_of::<WarpPushConstants>() as u32);
        let set_layouts = [self.descriptor_set_layout];
        let push_ranges = [push_range];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let create_pipeline_layout = self
            .dispatch
            .create_pipeline_layout
            .ok_or(NvxError::ExtensionNotPresent)?;
        check_vk(unsafe {
            create_pipeline_layout(
                device,
                &pipeline_layout_info,
                ptr::null(),
                &mut self.pipeline_layout,
            )
        })?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: sampled,
                descriptor_count: 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: 1,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let create_pool = self
            .dispatch
            .create_descriptor_pool
            .ok_or(NvxError::ExtensionNotPresent)?;
        check_vk(unsafe {
            create_pool(device, &pool_info, ptr::null(), &mut self.descriptor_pool)
        })?;

        let alloc_layouts = [self.descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&alloc_layouts);
        let allocate_sets = self
            .dispatch
            .allocate_descriptor_sets
            .ok_or(NvxError::ExtensionNotPresent)?;
        check_vk(unsafe { allocate_sets(device, &alloc_info, &mut self.descriptor_set) })?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let create_sampler = self
            .dispatch
            .create_sampler
            .ok_or(NvxError::ExtensionNotPresent)?;
        check_vk(unsafe { create_sampler(device, &sampler_info, ptr::null(), &mut self.sampler) })
    }

    pub fn quality(&self) -> SynthesisQuality {
        self.quality
    }

    /// Switches the pass structure. Raising quality requires the additional
    /// kernels to have been installed.
    pub fn set_quality(&mut self, quality: SynthesisQuality) {
        self.quality = quality;
    }

    pub fn set_tuning(&mut self, tuning: SynthesisTuning) {
        self.tuning = tuning;
    }

    /// Builds the compute pipelines from host-supplied SPIR-V, replacing any
    /// previously installed set.
    pub fn install_shaders(&mut self, shaders: &SynthesisShaders<'_>) -> Result<()> {
        shaders.validate(self.quality)?;
        self.destroy_pipelines();

        let forward_warp = self.create_pipeline(shaders.forward_warp)?;
        let blend = self.create_pipeline(shaders.blend)?;
        let backward_warp = match shaders.backward_warp {
            Some(words) => Some(self.create_pipeline(words)?),
            None => None,
        };
        let confidence_blend = match shaders.confidence_blend {
            Some(words) => Some(self.create_pipeline(words)?),
            None => None,
        };
        let occlusion_fill = match shaders.occlusion_fill {
            Some(words) => Some(self.create_pipeline(words)?),
            None => None,
        };

        self.pipelines = Some(PipelineSet {
            forward_warp,
            backward_warp,
            blend,
            confidence_blend,
            occlusion_fill,
        });
        Ok(())
    }

    /// Installs the caller-owned storage image the blend passes write into.
    pub fn install_output(&mut self, output: FrameImage) -> Result<()> {
        if output.width != self.width || output.height != self.height {
            warn!(
                "synthesis output {}x{} does not match configured {}x{}",
                output.width, output.height, self.width, self.height
            );
            return Err(NvxError::InitializationFailed);
        }
        self.output = Some(output);
        Ok(())
    }

    pub fn output(&self) -> Option<&FrameImage> {
        self.output.as_ref()
    }

    /// Whether [`synthesize`](Self::synthesize) can record work right now.
    pub fn is_ready(&self) -> bool {
        let Some(pipelines) = &self.pipelines else {
            return false;
        };
        if self.output.is_none() {
            return false;
        }
        match self.quality {
            SynthesisQuality::Linear => true,
            SynthesisQuality::Bidirectional => pipelines.backward_warp.is_some(),
            SynthesisQuality::CostWeighted => {
                pipelines.backward_warp.is_some()
                    && pipelines.confidence_blend.is_some()
                    && pipelines.occlusion_fill.is_some()
            }
        }
    }

    fn create_pipeline(&self, code: &[u32]) -> Result<vk::Pipeline> {
        let device = self.dispatch.device();
        let create_module = self
            .dispatch
            .create_shader_module
            .ok_or(NvxError::ExtensionNotPresent)?;
        let destroy_module = self
            .dispatch
            .destroy_shader_module
            .ok_or(NvxError::ExtensionNotPresent)?;
        let create_pipelines = self
            .dispatch
            .create_compute_pipelines
            .ok_or(NvxError::ExtensionNotPresent)?;

        let module_info = vk::ShaderModuleCreateInfo::default().code(code);
        let mut module = vk::ShaderModule::null();
        check_vk(unsafe { create_module(device, &module_info, ptr::null(), &mut module) })?;

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main");
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(self.pipeline_layout);

        let mut pipeline = vk::Pipeline::null();
        let result = unsafe {
            create_pipelines(
                device,
                vk::PipelineCache::null(),
                1,
                &pipeline_info,
                ptr::null(),
                &mut pipeline,
            )
        };
        unsafe { destroy_module(device, module, ptr::null()) };
        check_vk(result)?;
        Ok(pipeline)
    }

    /// Records the interpolation passes for one intermediate frame and
    /// returns the output view. Inputs must match the configured extent.
    pub fn synthesize(
        &self,
        cmd: vk::CommandBuffer,
        prev_view: vk::ImageView,
        curr_view: vk::ImageView,
        motion_vectors: &MotionVectorBuffers,
    ) -> Result<vk::ImageView> {
        let pipelines = self.pipelines.as_ref().ok_or(NvxError::NotInitialized)?;
        let output = self.output.ok_or(NvxError::NotInitialized)?;

        self.write_descriptors(prev_view, curr_view, motion_vectors, output.view)?;

        let bind_sets = self
            .dispatch
            .cmd_bind_descriptor_sets
            .ok_or(NvxError::ExtensionNotPresent)?;
        let sets = [self.descriptor_set];
        unsafe {
            bind_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline_layout,
                0,
                1,
                sets.as_ptr(),
                0,
                ptr::null(),
            )
        };

        let t = self.tuning.interpolation;
        let forward = WarpPushConstants {
            mv_scale_x: MV_SCALE,
            mv_scale_y: MV_SCALE,
            interpolation: t,
            direction: 1.0,
        };
        self.record_pass(cmd, pipelines.forward_warp, push_bytes(&forward))?;

        if self.quality != SynthesisQuality::Linear {
            let backward_pipeline = pipelines
                .backward_warp
                .ok_or(NvxError::NotInitialized)?;
            let backward = WarpPushConstants {
                mv_scale_x: MV_SCALE,
                mv_scale_y: MV_SCALE,
                interpolation: 1.0 - t,
                direction: -1.0,
            };
            self.pass_barrier(cmd)?;
            self.record_pass(cmd, backward_pipeline, push_bytes(&backward))?;
        }

        self.pass_barrier(cmd)?;
        match self.quality {
            SynthesisQuality::Linear | SynthesisQuality::Bidirectional => {
                let blend = BlendPushConstants {
                    weight: t,
                    _pad: [0.0; 3],
                };
                self.record_pass(cmd, pipelines.blend, push_bytes(&blend))?;
            }
            SynthesisQuality::CostWeighted => {
                let confidence_pipeline = pipelines
                    .confidence_blend
                    .ok_or(NvxError::NotInitialized)?;
                let confidence = ConfidenceBlendPushConstants {
                    interpolation: t,
                    cost_scale: self.tuning.cost_scale,
                    min_confidence: self.tuning.min_confidence,
                    _pad: 0.0,
                };
                self.record_pass(cmd, confidence_pipeline, push_bytes(&confidence))?;

                let fill_pipeline = pipelines
                    .occlusion_fill
                    .ok_or(NvxError::NotInitialized)?;
                let fill = OcclusionFillPushConstants {
                    occlusion_threshold: self.tuning.occlusion_threshold,
                    fill_radius: self.tuning.fill_radius,
                    interpolation: t,
                    _pad: 0.0,
                };
                self.pass_barrier(cmd)?;
                self.record_pass(cmd, fill_pipeline, push_bytes(&fill))?;
            }
        }

        Ok(output.view)
    }

    fn write_descriptors(
        &self,
        prev_view: vk::ImageView,
        curr_view: vk::ImageView,
        motion_vectors: &MotionVectorBuffers,
        output_view: vk::ImageView,
    ) -> Result<()> {
        let update_sets = self
            .dispatch
            .update_descriptor_sets
            .ok_or(NvxError::ExtensionNotPresent)?;

        let sampled_info = |view: vk::ImageView| {
            [vk::DescriptorImageInfo {
                sampler: self.sampler,
                image_view: view,
                image_layout: vk::ImageLayout::GENERAL,
            }]
        };
        let prev_info = sampled_info(prev_view);
        let curr_info = sampled_info(curr_view);
        let flow_info = sampled_info(motion_vectors.flow.view);
        // Without a cost map the slot aliases the flow image; the kernels
        // that read binding 3 are only dispatched in cost-weighted mode.
        let cost_info = sampled_info(
            motion_vectors
                .cost
                .map(|cost| cost.view)
                .unwrap_or(motion_vectors.flow.view),
        );
        let output_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: output_view,
            image_layout: vk::ImageLayout::GENERAL,
        }];

        let sampled = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        let writes = [
            descriptor_write(self.descriptor_set, BINDING_INPUT_PREV, sampled, &prev_info),
            descriptor_write(self.descriptor_set, BINDING_INPUT_CURR, sampled, &curr_info),
            descriptor_write(
                self.descriptor_set,
                BINDING_MOTION_VECTORS,
                sampled,
                &flow_info,
            ),
            descriptor_write(self.descriptor_set, BINDING_COST_MAP, sampled, &cost_info),
            descriptor_write(
                self.descriptor_set,
                BINDING_OUTPUT,
                vk::DescriptorType::STORAGE_IMAGE,
                &output_info,
            ),
        ];
        unsafe {
            update_sets(
                self.dispatch.device(),
                writes.len() as u32,
                writes.as_ptr(),
                0,
                ptr::null(),
            )
        };
        Ok(())
    }

    fn record_pass(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline, constants: &[u8]) -> Result<()> {
        let bind_pipeline = self
            .dispatch
            .cmd_bind_pipeline
            .ok_or(NvxError::ExtensionNotPresent)?;
        let push_constants = self
            .dispatch
            .cmd_push_constants
            .ok_or(NvxError::ExtensionNotPresent)?;
        let dispatch_call = self
            .dispatch
            .cmd_dispatch
            .ok_or(NvxError::ExtensionNotPresent)?;

        unsafe {
            bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline);
            push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                constants.len() as u32,
                constants.as_ptr().cast(),
            );
            dispatch_call(
                cmd,
                self.width.div_ceil(WORKGROUP_SIZE),
                self.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        Ok(())
    }

    fn pass_barrier(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let pipeline_barrier = self
            .dispatch
            .cmd_pipeline_barrier
            .ok_or(NvxError::ExtensionNotPresent)?;
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE);
        unsafe {
            pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::PipelineStageFlags::COMPUTE_SHADER,
                vk::DependencyFlags::empty(),
                1,
                &barrier,
                0,
                ptr::null(),
                0,
                ptr::null(),
            )
        };
        Ok(())
    }

    fn destroy_pipelines(&mut self) {
        let Some(pipelines) = self.pipelines.take() else {
            return;
        };
        let Some(destroy) = self.dispatch.destroy_pipeline else {
            return;
        };
        let device = self.dispatch.device();
        let all = [
            Some(pipelines.forward_warp),
            pipelines.backward_warp,
            Some(pipelines.blend),
            pipelines.confidence_blend,
            pipelines.occlusion_fill,
        ];
        for pipeline in all.into_iter().flatten() {
            if pipeline != vk::Pipeline::null() {
                unsafe { destroy(device, pipeline, ptr::null()) };
            }
        }
    }
}

impl Drop for FrameSynthesisContext {
    fn drop(&mut self) {
        self.destroy_pipelines();
        let device = self.dispatch.device();
        unsafe {
            if self.sampler != vk::Sampler::null() {
                if let Some(destroy) = self.dispatch.destroy_sampler {
                    destroy(device, self.sampler, ptr::null());
                }
            }
            if self.descriptor_pool != vk::DescriptorPool::null() {
                if let Some(destroy) = self.dispatch.destroy_descriptor_pool {
                    destroy(device, self.descriptor_pool, ptr::null());
                }
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                if let Some(destroy) = self.dispatch.destroy_pipeline_layout {
                    destroy(device, self.pipeline_layout, ptr::null());
                }
            }
            if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                if let Some(destroy) = self.dispatch.destroy_descriptor_set_layout {
                    destroy(device, self.descriptor_set_layout, ptr::null());
                }
            }
        }
    }
}

unsafe impl Send for FrameSynthesisContext {}

fn descriptor_binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(descriptor_type)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
}

fn descriptor_write<'a>(
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    image_info: &'a [vk::DescriptorImageInfo],
) -> vk::WriteDescriptorSet<'a> {
    vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .image_info(image_info)
}

fn push_bytes<T: Copy>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts((value as *const T).cast(), mem::size_of::<T>()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::null_dispatch;

    #[test]
    fn push_constant_layouts_are_16_bytes() {
        assert_eq!(mem::size_of::<WarpPushConstants>(), 16);
        assert_eq!(mem::size_of::<BlendPushConstants>(), 16);
        assert_eq!(mem::size_of::<ConfidenceBlendPushConstants>(), 16);
        assert_eq!(mem::size_of::<OcclusionFillPushConstants>(), 16);
    }

    #[test]
    fn shader_set_validation_per_quality() {
        let full = SynthesisShaders {
            forward_warp: &[0],
            backward_warp: Some(&[0]),
            blend: &[0],
            confidence_blend: Some(&[0]),
            occlusion_fill: Some(&[0]),
        };
        assert!(full.validate(SynthesisQuality::Linear).is_ok());
        assert!(full.validate(SynthesisQuality::Bidirectional).is_ok());
        assert!(full.validate(SynthesisQuality::CostWeighted).is_ok());

        let minimal = SynthesisShaders {
            forward_warp: &[0],
            backward_warp: None,
            blend: &[0],
            confidence_blend: None,
            occlusion_fill: None,
        };
        assert!(minimal.validate(SynthesisQuality::Linear).is_ok());
        assert_eq!(
            minimal.validate(SynthesisQuality::Bidirectional),
            Err(NvxError::InitializationFailed)
        );
        assert_eq!(
            minimal.validate(SynthesisQuality::CostWeighted),
            Err(NvxError::InitializationFailed)
        );
    }

    #[test]
    fn construction_without_core_entry_points_fails() {
        let result = FrameSynthesisContext::new(
            Arc::new(null_dispatch()),
            1920,
            1080,
            SynthesisQuality::Linear,
        );
        assert!(matches!(result, Err(NvxError::ExtensionNotPresent)));
    }
}
