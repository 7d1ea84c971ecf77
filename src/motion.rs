//! Motion-vector stage: frame history and optical-flow execution.
//!
//! Holds the two most recent real frames in a fixed 2-slot ring and, once
//! both slots are populated, binds them to the optical-flow session and
//! records the estimation.
//!
//! Ring convention: `cursor` always points at the next write slot. Directly
//! after [`MotionVectorContext::push`], the frame just written (the newest)
//! is `1 - cursor` and the older frame is `cursor`.

use ash::vk;

use crate::error::{NvxError, Result};
use crate::optical_flow::{FlowBindingPoint, OpticalFlowSession};

/// Converts an S10.5 fixed-point motion-vector component to pixels.
pub fn s10_5_to_float(value: i16) -> f32 {
    value as f32 / 32.0
}

/// Converts a pixel displacement to S10.5 fixed point (truncating).
pub fn float_to_s10_5(value: f32) -> i16 {
    (value * 32.0).trunc() as i16
}

/// A caller-owned frame image: the handles plus its backing memory and
/// pixel dimensions. All handles stay owned (and destroyed) by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: vk::DeviceMemory,
    pub width: u32,
    pub height: u32,
}

impl FrameImage {
    pub fn is_empty(&self) -> bool {
        self.view == vk::ImageView::null()
    }
}

/// Caller-owned output images the session writes into.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionVectorBuffers {
    /// Forward flow vectors (S10.5 per grid cell).
    pub flow: FrameImage,
    pub backward_flow: Option<FrameImage>,
    pub cost: Option<FrameImage>,
    pub backward_cost: Option<FrameImage>,
}

/// Two-slot frame-history ring driving the optical-flow session.
pub struct MotionVectorContext {
    session: Option<OpticalFlowSession>,
    buffers: Option<MotionVectorBuffers>,
    frame_history: [FrameImage; 2],
    cursor: usize,
    push_count: u64,
}

impl MotionVectorContext {
    pub fn new() -> Self {
        Self {
            session: None,
            buffers: None,
            frame_history: [FrameImage::default(); 2],
            cursor: 0,
            push_count: 0,
        }
    }

    pub fn set_session(&mut self, session: OpticalFlowSession) {
        self.session = Some(session);
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn install_buffers(&mut self, buffers: MotionVectorBuffers) {
        self.buffers = Some(buffers);
    }

    pub fn motion_vectors(&self) -> Option<&MotionVectorBuffers> {
        self.buffers.as_ref()
    }

    /// Writes `frame` into the ring and rotates the cursor. Returns whether
    /// enough history exists to estimate motion.
    pub fn push(&mut self, frame: FrameImage) -> bool {
        self.frame_history[self.cursor] = frame;
        self.cursor = 1 - self.cursor;
        self.push_count += 1;
        self.push_count >= 2
    }

    /// The most recently pushed frame.
    pub fn current_frame(&self) -> &FrameImage {
        &self.frame_history[1 - self.cursor]
    }

    /// The frame pushed before the current one.
    pub fn previous_frame(&self) -> &FrameImage {
        &self.frame_history[self.cursor]
    }

    pub fn push_count(&self) -> u64 {
        self.push_count
    }

    /// Binds the two newest frames plus the output buffers to the session
    /// and records the estimation onto `cmd`.
    pub fn execute(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        if self.push_count < 2 {
            return Err(NvxError::InsufficientFrames);
        }
        let session = self.session.as_mut().ok_or(NvxError::NotInitialized)?;
        let buffers = self.buffers.ok_or(NvxError::NotInitialized)?;
        let current = self.frame_history[1 - self.cursor];
        let previous = self.frame_history[self.cursor];

        session.bind_image(
            FlowBindingPoint::Input,
            current.view,
            vk::ImageLayout::GENERAL,
        )?;
        session.bind_image(
            FlowBindingPoint::Reference,
            previous.view,
            vk::ImageLayout::GENERAL,
        )?;
        session.bind_image(
            FlowBindingPoint::FlowVector,
            buffers.flow.view,
            vk::ImageLayout::GENERAL,
        )?;
        if let Some(backward) = buffers.backward_flow {
            session.bind_image(
                FlowBindingPoint::BackwardFlowVector,
                backward.view,
                vk::ImageLayout::GENERAL,
            )?;
        }
        if let Some(cost) = buffers.cost {
            session.bind_image(FlowBindingPoint::Cost, cost.view, vk::ImageLayout::GENERAL)?;
        }
        if let Some(backward_cost) = buffers.backward_cost {
            session.bind_image(
                FlowBindingPoint::BackwardCost,
                backward_cost.view,
                vk::ImageLayout::GENERAL,
            )?;
        }

        session.execute(cmd, None, false)
    }
}

impl Default for MotionVectorContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn ring_labels_across_three_pushes() {
        let mut ctx = MotionVectorContext::new();

        assert!(!ctx.push(frame(1)));
        assert_eq!(ctx.current_frame().image.as_raw(), 1);

        assert!(ctx.push(frame(2)));
        assert_eq!(ctx.current_frame().image.as_raw(), 2);
        assert_eq!(ctx.previous_frame().image.as_raw(), 1);

        assert!(ctx.push(frame(3)));
        assert_eq!(ctx.current_frame().image.as_raw(), 3);
        assert_eq!(ctx.previous_frame().image.as_raw(), 2);
        assert_eq!(ctx.push_count(), 3);
    }

    #[test]
    fn execute_requires_history_and_session() {
        let mut ctx = MotionVectorContext::new();
        assert_eq!(
            ctx.execute(vk::CommandBuffer::null()),
            Err(NvxError::InsufficientFrames)
        );

        ctx.push(frame(1));
        assert_eq!(
            ctx.execute(vk::CommandBuffer::null()),
            Err(NvxError::InsufficientFrames)
        );

        ctx.push(frame(2));
        // Two frames but no session was ever created.
        assert_eq!(
            ctx.execute(vk::CommandBuffer::null()),
            Err(NvxError::NotInitialized)
        );
    }

    #[test]
    fn s10_5_round_trip() {
        for value in [-16.0f32, -3.96875, -0.03125, 0.0, 0.03125, 2.5, 15.5] {
            let encoded = float_to_s10_5(value);
            assert_eq!(s10_5_to_float(encoded), (value * 32.0).trunc() / 32.0);
        }
        assert_eq!(float_to_s10_5(1.0), 32);
        assert_eq!(s10_5_to_float(32), 1.0);
        assert_eq!(float_to_s10_5(-0.5), -16);
        // Sub-step displacements truncate toward zero.
        assert_eq!(float_to_s10_5(0.01), 0);
    }
}
