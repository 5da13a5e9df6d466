// Frame scheduler
//
// Single frame in flight: begin_frame waits on the previous frame's fence,
// acquires an image and opens the frame; draws are collected as plain records;
// end_frame records the image's command buffer in one go, submits and presents.
// Recording at the end means setters called anywhere inside the frame apply.

use ash::vk;
use glam::{Mat4, Vec4};
use std::sync::Arc;

use crate::backend::pipeline::{DrawPushConstants, PUSH_CONSTANT_STAGES};
use crate::backend::swapchain::{PresentationSurface, SwapchainState};
use crate::backend::sync::FrameSync;
use crate::backend::Gpu;
use crate::error::{RendererError, Result};
use crate::resources::{Mesh, Pipeline, ResourceTable};

/// Viewport in framebuffer pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Per-frame render state consumed when the frame is recorded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub clear_color: [f32; 4],
    /// `None` covers the whole swapchain image
    pub viewport: Option<Viewport>,
    pub view: Mat4,
    pub projection: Mat4,
}

impl RenderState {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            viewport: None,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }

    fn vk_viewport(&self, extent: vk::Extent2D) -> vk::Viewport {
        let area = self.viewport.unwrap_or(Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
        });
        vk::Viewport {
            x: area.x,
            y: area.y,
            width: area.width,
            height: area.height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// A draw request with its resources resolved; holds raw handles only
#[derive(Debug, Clone, Copy)]
pub struct DrawRecord {
    pub mesh: Mesh,
    pub pipeline: Pipeline,
    pub transform: Mat4,
    pub color: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Recording { image_index: u32 },
    /// Frame opened while the surface is suspended; nothing is drawn
    Skipped,
}

impl FramePhase {
    /// True while an acquired image is waiting for `end_frame`. A skipped
    /// frame holds nothing, so closing it is optional.
    pub fn holds_image(self) -> bool {
        matches!(self, Self::Recording { .. })
    }
}

pub struct FrameScheduler<G: Gpu> {
    gpu: Arc<G>,
    command_pool: vk::CommandPool,
    /// One per swapchain image
    command_buffers: Vec<vk::CommandBuffer>,
    sync: FrameSync,
    phase: FramePhase,
    /// Frames handed to the queue so far
    submitted: u64,
    /// Frames whose fence has been observed signaled
    completed: u64,
    draws: Vec<DrawRecord>,
    bound_pipeline: Option<Pipeline>,
}

impl<G: Gpu> FrameScheduler<G> {
    pub fn new(gpu: Arc<G>) -> Result<Self> {
        let command_pool = gpu.create_command_pool(
            gpu.queues().graphics_family,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let sync = match FrameSync::new(gpu.as_ref()) {
            Ok(sync) => sync,
            Err(e) => {
                gpu.destroy_command_pool(command_pool);
                return Err(e);
            }
        };

        Ok(Self {
            gpu,
            command_pool,
            command_buffers: Vec::new(),
            sync,
            phase: FramePhase::Idle,
            submitted: 0,
            completed: 0,
            draws: Vec::new(),
            bound_pipeline: None,
        })
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Last frame that may reference a resource released right now
    pub fn frame_in_use(&self) -> u64 {
        match self.phase {
            FramePhase::Recording { .. } => self.submitted + 1,
            _ => self.submitted,
        }
    }

    pub fn pending_draws(&self) -> usize {
        self.draws.len()
    }

    /// Open a frame. Returns `Ok(false)` when the surface is suspended; no
    /// image was acquired and `end_frame` is then a no-op the host may skip.
    pub fn begin_frame(
        &mut self,
        surface: &mut PresentationSurface<G>,
        table: &ResourceTable,
    ) -> Result<bool> {
        if self.phase.holds_image() {
            return Err(RendererError::FrameInProgress);
        }
        self.phase = FramePhase::Idle;

        // The previous frame is finished once its fence is signaled
        self.gpu
            .wait_for_fence(self.sync.in_flight_fence, u64::MAX)?;
        self.completed = self.submitted;
        table.collect(self.completed, self.gpu.as_ref());

        if surface.needs_rebuild() {
            surface.invalidate()?;
        }

        let image_index = match self.acquire(surface)? {
            Some(index) => index,
            None => {
                log::trace!("Surface suspended, skipping frame");
                self.phase = FramePhase::Skipped;
                return Ok(false);
            }
        };

        let image_count = surface.state().map_or(0, |state| state.images.len());
        // The fence is reset only once a submit is guaranteed to follow
        let prepared = self
            .ensure_command_buffers(image_count)
            .and_then(|()| Ok(self.gpu.reset_fence(self.sync.in_flight_fence)?));
        if let Err(e) = prepared {
            // The acquire semaphore is already pending
            self.abandon();
            return Err(e);
        }

        self.phase = FramePhase::Recording { image_index };
        self.draws.clear();
        self.bound_pipeline = None;
        log::trace!("Frame {} began on image {}", self.submitted + 1, image_index);
        Ok(true)
    }

    /// Acquire the next image, rebuilding and retrying once if the chain is stale
    fn acquire(&self, surface: &mut PresentationSurface<G>) -> Result<Option<u32>> {
        for attempt in 0..2 {
            let swapchain = match surface.state() {
                Some(state) => state.swapchain,
                None => return Ok(None),
            };

            match self
                .gpu
                .acquire_next_image(swapchain, u64::MAX, self.sync.image_available)
            {
                Ok((index, suboptimal)) => {
                    if suboptimal {
                        // Still presentable; rebuild before the next frame
                        surface.mark_stale();
                    }
                    return Ok(Some(index));
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) if attempt == 0 => {
                    log::debug!("Swapchain out of date at acquire, rebuilding");
                    surface.invalidate()?;
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    surface.mark_stale();
                    return Err(RendererError::SwapchainOutOfDate);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RendererError::SwapchainOutOfDate)
    }

    fn ensure_command_buffers(&mut self, count: usize) -> Result<()> {
        if self.command_buffers.len() == count {
            return Ok(());
        }
        if !self.command_buffers.is_empty() {
            self.gpu
                .free_command_buffers(self.command_pool, &self.command_buffers);
            self.command_buffers.clear();
        }
        self.command_buffers = self
            .gpu
            .allocate_command_buffers(self.command_pool, count as u32)?;
        log::debug!("Allocated {} frame command buffers", count);
        Ok(())
    }

    pub fn bind_pipeline(&mut self, pipeline: Pipeline) -> Result<()> {
        match self.phase {
            FramePhase::Recording { .. } => {
                self.bound_pipeline = Some(pipeline);
                Ok(())
            }
            FramePhase::Skipped => Ok(()),
            FramePhase::Idle => Err(RendererError::NoFrameInProgress),
        }
    }

    /// Queue a draw with the bound pipeline
    pub fn submit_draw(&mut self, mesh: Mesh, transform: Mat4, color: Vec4) -> Result<()> {
        match self.phase {
            FramePhase::Recording { .. } => {
                let pipeline = self.bound_pipeline.ok_or(RendererError::NoPipelineBound)?;
                self.draws.push(DrawRecord {
                    mesh,
                    pipeline,
                    transform,
                    color,
                });
                Ok(())
            }
            FramePhase::Skipped => Ok(()),
            FramePhase::Idle => Err(RendererError::NoFrameInProgress),
        }
    }

    /// Record, submit and present the open frame
    pub fn end_frame(
        &mut self,
        surface: &mut PresentationSurface<G>,
        render: &RenderState,
    ) -> Result<()> {
        let image_index = match self.phase {
            FramePhase::Idle => return Err(RendererError::NoFrameInProgress),
            FramePhase::Skipped => {
                self.phase = FramePhase::Idle;
                return Ok(());
            }
            FramePhase::Recording { image_index } => image_index,
        };
        self.phase = FramePhase::Idle;

        let submitted = match surface.state() {
            Some(state) => self.record_and_submit(state, image_index, render),
            None => Err(RendererError::NoSurface),
        };
        self.draws.clear();
        if let Err(e) = submitted {
            log::error!("Frame {} abandoned: {}", self.submitted + 1, e);
            self.abandon();
            return Err(e);
        }
        self.submitted += 1;

        let Some(state) = surface.state() else {
            return Ok(());
        };
        let wait_semaphores = [self.sync.render_finished];
        let swapchains = [state.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match self
            .gpu
            .queue_present(self.gpu.queues().graphics, &present_info)
        {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Swapchain stale at present, rebuilding before next frame");
                surface.mark_stale();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn record_and_submit(
        &self,
        state: &SwapchainState,
        image_index: u32,
        render: &RenderState,
    ) -> Result<()> {
        let gpu = self.gpu.as_ref();
        let cmd = *self
            .command_buffers
            .get(image_index as usize)
            .ok_or(RendererError::SwapchainOutOfDate)?;
        let framebuffer = *state
            .framebuffers
            .get(image_index as usize)
            .ok_or(RendererError::SwapchainOutOfDate)?;

        gpu.reset_command_buffer(cmd)?;
        gpu.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: render.clear_color,
            },
        }];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: state.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(state.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);
        gpu.cmd_begin_render_pass(cmd, &begin_info);

        gpu.cmd_set_viewport(cmd, render.vk_viewport(state.extent));
        gpu.cmd_set_scissor(cmd, render_area);

        let view_projection = render.projection * render.view;
        let mut current_pipeline = vk::Pipeline::null();
        for draw in &self.draws {
            if draw.pipeline.pipeline != current_pipeline {
                gpu.cmd_bind_pipeline(cmd, draw.pipeline.pipeline);
                current_pipeline = draw.pipeline.pipeline;
            }
            let constants = DrawPushConstants {
                mvp: view_projection * draw.transform,
                color: draw.color,
            };
            gpu.cmd_push_constants(
                cmd,
                draw.pipeline.layout,
                PUSH_CONSTANT_STAGES,
                bytemuck::bytes_of(&constants),
            );
            gpu.cmd_bind_vertex_buffer(cmd, draw.mesh.vertices.buffer);
            if draw.mesh.is_indexed() {
                gpu.cmd_bind_index_buffer(cmd, draw.mesh.indices.buffer);
                gpu.cmd_draw_indexed(cmd, draw.mesh.index_count);
            } else {
                gpu.cmd_draw(cmd, draw.mesh.vertex_count);
            }
        }

        gpu.cmd_end_render_pass(cmd);
        gpu.end_command_buffer(cmd)?;

        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [self.sync.render_finished];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        gpu.queue_submit(gpu.queues().graphics, &[submit_info], self.sync.in_flight_fence)?;
        Ok(())
    }

    /// The fence was reset but nothing was submitted: swap in fresh sync objects
    fn abandon(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device idle wait failed while abandoning frame: {}", e);
        }
        if let Err(e) = self.sync.recover(self.gpu.as_ref()) {
            log::error!("Failed to recreate frame sync objects: {}", e);
        }
    }

    /// Wait for the device and release command buffers and sync objects.
    /// Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.command_pool == vk::CommandPool::null() {
            return;
        }
        if let Err(e) = self.gpu.wait_idle() {
            log::warn!("Device idle wait failed during frame teardown: {}", e);
        }
        self.completed = self.submitted;
        if !self.command_buffers.is_empty() {
            self.gpu
                .free_command_buffers(self.command_pool, &self.command_buffers);
            self.command_buffers.clear();
        }
        self.gpu.destroy_command_pool(self.command_pool);
        self.command_pool = vk::CommandPool::null();
        self.sync.destroy(self.gpu.as_ref());
        self.phase = FramePhase::Idle;
    }
}

impl<G: Gpu> Drop for FrameScheduler<G> {
    fn drop(&mut self) {
        self.destroy();
    }
}
