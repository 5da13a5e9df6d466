// Handle-indexed registry of GPU resources
//
// The table is the sole owner of every registered resource. Command buffers
// only borrow raw Vulkan handles for the duration of a fenced frame, so a
// released resource is parked with the number of the last frame that could
// still reference it and destroyed once that frame's fence has been observed.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Handle, Mesh, Pipeline, Resource, ResourceKind, Shader, Texture};
use crate::backend::Gpu;
use crate::error::{RendererError, Result};

#[derive(Default)]
struct TableInner {
    entries: HashMap<Handle, Resource>,
    /// Released resources tagged with the frame that may still use them
    retired: Vec<(u64, Resource)>,
    /// Set at shutdown; later registrations are refused
    closed: bool,
}

pub struct ResourceTable {
    next_id: AtomicU64,
    inner: Mutex<TableInner>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(TableInner::default()),
        }
    }

    /// Take ownership of `resource` and issue its handle.
    ///
    /// Handles are issued under the table lock, so they increase in
    /// registration order even with concurrent loaders. A closed table
    /// destroys the resource and refuses it.
    pub fn register<G: Gpu + ?Sized>(&self, gpu: &G, resource: Resource) -> Result<Handle> {
        let mut inner = self.inner.lock();
        if inner.closed {
            drop(inner);
            resource.destroy(gpu);
            return Err(RendererError::NotInitialized);
        }
        let handle = Handle(self.next_id.fetch_add(1, Ordering::Relaxed));
        inner.entries.insert(handle, resource);
        log::debug!("Registered {} {}", resource.kind(), handle);
        Ok(handle)
    }

    pub fn lookup(&self, handle: Handle) -> Option<Resource> {
        self.inner.lock().entries.get(&handle).copied()
    }

    fn resolve(&self, handle: Handle, expected: ResourceKind) -> Result<Resource> {
        self.lookup(handle).ok_or(RendererError::UnresolvedHandle {
            kind: expected,
            handle,
        })
    }

    pub fn mesh(&self, handle: Handle) -> Result<Mesh> {
        match self.resolve(handle, ResourceKind::Mesh)? {
            Resource::Mesh(mesh) => Ok(mesh),
            other => Err(wrong_kind(handle, ResourceKind::Mesh, other)),
        }
    }

    pub fn texture(&self, handle: Handle) -> Result<Texture> {
        match self.resolve(handle, ResourceKind::Texture)? {
            Resource::Texture(texture) => Ok(texture),
            other => Err(wrong_kind(handle, ResourceKind::Texture, other)),
        }
    }

    pub fn shader(&self, handle: Handle) -> Result<Shader> {
        match self.resolve(handle, ResourceKind::Shader)? {
            Resource::Shader(shader) => Ok(shader),
            other => Err(wrong_kind(handle, ResourceKind::Shader, other)),
        }
    }

    pub fn pipeline(&self, handle: Handle) -> Result<Pipeline> {
        match self.resolve(handle, ResourceKind::Pipeline)? {
            Resource::Pipeline(pipeline) => Ok(pipeline),
            other => Err(wrong_kind(handle, ResourceKind::Pipeline, other)),
        }
    }

    /// Remove `handle` from the table and park its resource until
    /// `frame_in_use` has completed. Unknown handles are ignored.
    pub fn release(&self, handle: Handle, frame_in_use: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.remove(&handle) {
            Some(resource) => {
                log::debug!(
                    "Released {} {} (in use until frame {})",
                    resource.kind(),
                    handle,
                    frame_in_use
                );
                inner.retired.push((frame_in_use, resource));
                true
            }
            None => false,
        }
    }

    /// Destroy every parked resource whose last frame is `completed` or older
    pub fn collect<G: Gpu + ?Sized>(&self, completed: u64, gpu: &G) -> usize {
        let ready: Vec<Resource> = {
            let mut inner = self.inner.lock();
            let (ready, waiting) = inner
                .retired
                .drain(..)
                .partition::<Vec<_>, _>(|&(frame, _)| frame <= completed);
            inner.retired = waiting;
            ready.into_iter().map(|(_, resource)| resource).collect()
        };

        let count = ready.len();
        for resource in ready {
            resource.destroy(gpu);
        }
        if count > 0 {
            log::trace!("Destroyed {} retired resources (frame {})", count, completed);
        }
        count
    }

    /// Close the table and destroy everything it owns. The device must be idle.
    pub fn drain_all<G: Gpu + ?Sized>(&self, gpu: &G) {
        let (entries, retired) = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            (
                std::mem::take(&mut inner.entries),
                std::mem::take(&mut inner.retired),
            )
        };

        let total = entries.len() + retired.len();
        let mut entries: Vec<_> = entries.into_iter().collect();
        // Newest first, so pipelines go before the shaders they were built from
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, resource) in entries {
            resource.destroy(gpu);
        }
        for (_, resource) in retired {
            resource.destroy(gpu);
        }
        if total > 0 {
            log::info!("Destroyed {} resources at shutdown", total);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|r| r.kind() == kind)
            .count()
    }

    /// Released resources still waiting for their frame to complete
    pub fn pending(&self) -> usize {
        self.inner.lock().retired.len()
    }
}

fn wrong_kind(handle: Handle, expected: ResourceKind, actual: Resource) -> RendererError {
    RendererError::WrongKind {
        handle,
        expected,
        actual: actual.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::buffer::DeviceBuffer;
    use crate::backend::testing::MockGpu;
    use ash::vk;
    use std::sync::Arc;

    fn shader() -> Resource {
        Resource::Shader(Shader {
            module: vk::ShaderModule::null(),
            stage: vk::ShaderStageFlags::VERTEX,
        })
    }

    fn mesh() -> Resource {
        Resource::Mesh(Mesh {
            vertices: DeviceBuffer::NULL,
            indices: DeviceBuffer::NULL,
            vertex_count: 3,
            index_count: 0,
        })
    }

    #[test]
    fn handles_start_at_one_and_increase() {
        let gpu = MockGpu::new();
        let table = ResourceTable::new();
        let a = table.register(&gpu, shader()).unwrap();
        let b = table.register(&gpu, mesh()).unwrap();
        assert_eq!(a, Handle(1));
        assert!(b > a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn handles_are_not_reused_after_release() {
        let gpu = MockGpu::new();
        let table = ResourceTable::new();
        let a = table.register(&gpu, shader()).unwrap();
        table.release(a, 0);
        let b = table.register(&gpu, shader()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn released_handle_no_longer_resolves() {
        let gpu = MockGpu::new();
        let table = ResourceTable::new();
        let handle = table.register(&gpu, mesh()).unwrap();

        assert!(table.release(handle, 0));
        assert!(table.lookup(handle).is_none());
        assert!(table.mesh(handle).unwrap_err().is_unresolved_handle());

        // Double release and never-issued handles are harmless
        assert!(!table.release(handle, 0));
        assert!(!table.release(Handle(999), 0));
        assert!(!table.release(Handle::INVALID, 0));
    }

    #[test]
    fn typed_lookup_reports_wrong_kind() {
        let gpu = MockGpu::new();
        let table = ResourceTable::new();
        let handle = table.register(&gpu, mesh()).unwrap();
        assert!(matches!(
            table.shader(handle),
            Err(RendererError::WrongKind {
                expected: ResourceKind::Shader,
                actual: ResourceKind::Mesh,
                ..
            })
        ));
    }

    #[test]
    fn retired_resources_wait_for_their_frame() {
        let gpu = MockGpu::new();
        let module = gpu.create_shader_module(&[0x0723_0203]).unwrap();
        let table = ResourceTable::new();
        let handle = table
            .register(
                &gpu,
                Resource::Shader(Shader {
                    module,
                    stage: vk::ShaderStageFlags::FRAGMENT,
                }),
            )
            .unwrap();

        table.release(handle, 5);
        assert_eq!(table.collect(4, &gpu), 0);
        assert_eq!(gpu.live("shader_module"), 1);
        assert_eq!(table.pending(), 1);

        assert_eq!(table.collect(5, &gpu), 1);
        assert_eq!(gpu.live("shader_module"), 0);
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn drain_closes_the_table() {
        let gpu = MockGpu::new();
        let module = gpu.create_shader_module(&[0x0723_0203]).unwrap();
        let table = ResourceTable::new();
        table
            .register(
                &gpu,
                Resource::Shader(Shader {
                    module,
                    stage: vk::ShaderStageFlags::VERTEX,
                }),
            )
            .unwrap();

        table.drain_all(&gpu);
        assert!(table.is_empty());
        assert_eq!(gpu.live("shader_module"), 0);

        let late = gpu.create_shader_module(&[0x0723_0203]).unwrap();
        let refused = table.register(
            &gpu,
            Resource::Shader(Shader {
                module: late,
                stage: vk::ShaderStageFlags::VERTEX,
            }),
        );
        assert!(matches!(refused, Err(RendererError::NotInitialized)));
        assert_eq!(gpu.live("shader_module"), 0);
    }

    #[test]
    fn concurrent_registration_never_collides() {
        let gpu = Arc::new(MockGpu::new());
        let table = Arc::new(ResourceTable::new());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gpu = gpu.clone();
                let table = table.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| table.register(gpu.as_ref(), shader()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut handles: Vec<Handle> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        handles.sort();
        handles.dedup();
        assert_eq!(handles.len(), 400);
        assert_eq!(table.len(), 400);
        assert!(!handles.contains(&Handle::INVALID));
    }
}
