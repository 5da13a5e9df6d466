// Synchronization primitives
//
// One image-available semaphore, one render-finished semaphore and one
// in-flight fence. The renderer keeps a single frame in flight.

use ash::vk;

use super::gpu::Gpu;
use crate::error::Result;

/// Frame synchronization for the single frame in flight
#[derive(Debug)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    const NULL: Self = Self {
        image_available: vk::Semaphore::null(),
        render_finished: vk::Semaphore::null(),
        in_flight_fence: vk::Fence::null(),
    };

    /// The fence starts signaled so the first `begin_frame` does not block
    pub fn new<G: Gpu + ?Sized>(gpu: &G) -> Result<Self> {
        let mut sync = Self::NULL;
        let created = (|| -> Result<()> {
            sync.image_available = gpu.create_semaphore()?;
            sync.render_finished = gpu.create_semaphore()?;
            sync.in_flight_fence = gpu.create_fence(true)?;
            Ok(())
        })();

        if let Err(e) = created {
            log::error!("Failed to create frame sync objects: {}", e);
            sync.destroy(gpu);
            return Err(e);
        }
        Ok(sync)
    }

    /// Replace the fence and the acquire semaphore after an abandoned frame.
    ///
    /// A frame dropped between fence reset and submit leaves the fence
    /// unsignaled forever and the acquire semaphore signaled with no waiter.
    /// The caller must make sure the device is idle first.
    pub fn recover<G: Gpu + ?Sized>(&mut self, gpu: &G) -> Result<()> {
        let fence = gpu.create_fence(true)?;
        let image_available = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_fence(fence);
                return Err(e.into());
            }
        };
        if self.in_flight_fence != vk::Fence::null() {
            gpu.destroy_fence(self.in_flight_fence);
        }
        if self.image_available != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.image_available);
        }
        self.in_flight_fence = fence;
        self.image_available = image_available;
        Ok(())
    }

    /// Safe to call repeatedly; handles are nulled once destroyed
    pub fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        if self.image_available != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.image_available);
        }
        if self.render_finished != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.render_finished);
        }
        if self.in_flight_fence != vk::Fence::null() {
            gpu.destroy_fence(self.in_flight_fence);
        }
        *self = Self::NULL;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MockGpu;

    #[test]
    fn fence_starts_signaled() {
        let gpu = MockGpu::new();
        let mut sync = FrameSync::new(&gpu).unwrap();
        assert!(gpu.wait_for_fence(sync.in_flight_fence, 0).is_ok());
        sync.destroy(&gpu);
    }

    #[test]
    fn partial_creation_is_rolled_back() {
        let gpu = MockGpu::new();
        gpu.fail_next("fence");

        assert!(FrameSync::new(&gpu).is_err());
        assert_eq!(gpu.live("semaphore"), 0);
        assert_eq!(gpu.live("fence"), 0);
    }

    #[test]
    fn destroy_is_idempotent() {
        let gpu = MockGpu::new();
        let mut sync = FrameSync::new(&gpu).unwrap();
        sync.destroy(&gpu);
        sync.destroy(&gpu);
        assert_eq!(gpu.total_live(), 0);
        assert_eq!(gpu.invalid_destroys(), 0);
    }

    #[test]
    fn recover_replaces_fence_and_acquire_semaphore() {
        let gpu = MockGpu::new();
        let mut sync = FrameSync::new(&gpu).unwrap();
        let old_semaphore = sync.image_available;
        gpu.reset_fence(sync.in_flight_fence).unwrap();

        sync.recover(&gpu).unwrap();
        assert_ne!(sync.image_available, old_semaphore);
        assert_eq!(gpu.live("fence"), 1);
        assert_eq!(gpu.live("semaphore"), 2);
        assert!(gpu.wait_for_fence(sync.in_flight_fence, 0).is_ok());
        sync.destroy(&gpu);
    }
}
