// Transfer engine - host to device uploads
//
// Every upload goes through a host-visible staging buffer and a one-shot
// command buffer on the transfer queue. Uploads are synchronous: the call
// returns after the transfer queue is idle and the staging buffer is freed.

use ash::vk;
use parking_lot::Mutex;
use std::sync::Arc;

use super::buffer::{create_buffer, create_host_buffer, DeviceBuffer};
use super::gpu::Gpu;
use crate::error::{RendererError, Result};

pub struct TransferEngine<G: Gpu> {
    gpu: Arc<G>,
    /// Command pools are externally synchronized; loader threads share this one
    pool: Mutex<vk::CommandPool>,
}

impl<G: Gpu> TransferEngine<G> {
    pub fn new(gpu: Arc<G>) -> Result<Self> {
        let pool = gpu.create_command_pool(
            gpu.queues().transfer_family,
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        log::debug!(
            "Transfer engine ready on queue family {}",
            gpu.queues().transfer_family
        );
        Ok(Self {
            gpu,
            pool: Mutex::new(pool),
        })
    }

    /// Copy `data` into a new device-local buffer with `usage | TRANSFER_DST`
    pub fn upload_to_device(
        &self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<DeviceBuffer> {
        let gpu = self.gpu.as_ref();
        let staging = create_host_buffer(gpu, vk::BufferUsageFlags::TRANSFER_SRC, data)?;

        let destination = create_buffer(
            gpu,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            &gpu.queues().upload_families(),
        );

        let result = destination.and_then(|destination| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            match self.submit_one_shot(|cmd| {
                gpu.cmd_copy_buffer(cmd, staging.buffer, destination.buffer, &[region])
            }) {
                Ok(()) => Ok(destination),
                Err(e) => {
                    destination.destroy(gpu);
                    Err(e)
                }
            }
        });

        staging.destroy(gpu);
        if let Ok(buffer) = &result {
            log::trace!("Uploaded {} bytes to device buffer {:?}", buffer.size, buffer.buffer);
        }
        result
    }

    /// Copy tightly packed pixels into `image` and leave it ready for sampling
    pub fn upload_to_image(&self, data: &[u8], image: vk::Image, extent: vk::Extent2D) -> Result<()> {
        let gpu = self.gpu.as_ref();
        let staging = create_host_buffer(gpu, vk::BufferUsageFlags::TRANSFER_SRC, data)?;

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let result = self.submit_one_shot(|cmd| {
            let to_transfer = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(subresource_range)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            gpu.cmd_image_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                &to_transfer,
            );

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .build();
            gpu.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            // The transfer queue may lack fragment stages; later graphics
            // submissions are ordered after this one by the queue-idle wait.
            let to_shader_read = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(subresource_range)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::empty());
            gpu.cmd_image_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                &to_shader_read,
            );
        });

        staging.destroy(gpu);
        result
    }

    /// Record with `record`, submit to the transfer queue and block until idle
    fn submit_one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
        let gpu = self.gpu.as_ref();
        let pool = self.pool.lock();
        if *pool == vk::CommandPool::null() {
            return Err(RendererError::NotInitialized);
        }

        let cmd = gpu
            .allocate_command_buffers(*pool, 1)?
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;

        let result = (|| -> Result<()> {
            gpu.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            record(cmd);
            gpu.end_command_buffer(cmd)?;

            let command_buffers = [cmd];
            let submit = vk::SubmitInfo::builder()
                .command_buffers(&command_buffers)
                .build();
            let queue = gpu.queues().transfer;
            gpu.queue_submit(queue, &[submit], vk::Fence::null())?;
            gpu.queue_wait_idle(queue)?;
            Ok(())
        })();

        gpu.free_command_buffers(*pool, &[cmd]);
        result
    }

    /// Caller guarantees no upload is running
    pub fn destroy(&self) {
        let mut pool = self.pool.lock();
        if *pool != vk::CommandPool::null() {
            self.gpu.destroy_command_pool(*pool);
            *pool = vk::CommandPool::null();
        }
    }
}

impl<G: Gpu> Drop for TransferEngine<G> {
    fn drop(&mut self) {
        self.destroy();
    }
}
