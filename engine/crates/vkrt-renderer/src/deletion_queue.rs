use ash::vk;
use vkrt_gfx::{
    commands::fence::GfxFence,
    raytracing::acceleration::GfxAcceleration,
    resources::{buffer::GfxBuffer, image::GfxImage},
    swapchain::render_swapchain::GfxRenderSwapchain,
};

use crate::gpu_mesh::GpuMeshBuffers;

/// 延迟销毁的条目何时可以执行
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Readiness {
    /// 所属 slot 的 fence 在 flush 之前已经被等待过
    Immediate,
    /// 需要额外检查某个 fence，例如 present fence
    FenceSignaled(vk::Fence),
}

struct DeletionEntry<T> {
    payload: T,
    readiness: Readiness,
}

/// 有序的延迟销毁队列
///
/// 每个 frame slot 持有一个，在该 slot 的 fence 等待完成之后 flush。
/// 条目是带标签的值而不是闭包，因此可以在不产生副作用的情况下检查队列内容
pub struct DeletionQueue<T> {
    entries: Vec<DeletionEntry<T>>,
}

impl<T> Default for DeletionQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl<T> DeletionQueue<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }
}

// tools
impl<T> DeletionQueue<T> {
    #[inline]
    pub fn push(&mut self, payload: T, readiness: Readiness) {
        self.entries.push(DeletionEntry { payload, readiness });
    }

    /// 按顺序访问每个条目一次：就绪的条目交给 `destroy` 并移出队列，未就绪的条目保持原有的相对顺序
    ///
    /// `is_ready` 返回错误时（例如设备丢失），当前条目以及尚未访问的条目都会留在队列中，错误原样返回
    ///
    /// 返回被销毁的条目数量
    pub fn flush(
        &mut self,
        mut is_ready: impl FnMut(&Readiness) -> anyhow::Result<bool>,
        mut destroy: impl FnMut(T),
    ) -> anyhow::Result<usize> {
        let mut kept = Vec::with_capacity(self.entries.len());
        let mut destroyed = 0;

        let mut entries = std::mem::take(&mut self.entries).into_iter();
        while let Some(entry) = entries.next() {
            match is_ready(&entry.readiness) {
                Ok(true) => {
                    destroy(entry.payload);
                    destroyed += 1;
                }
                Ok(false) => kept.push(entry),
                Err(e) => {
                    kept.push(entry);
                    kept.extend(entries);
                    self.entries = kept;
                    return Err(e);
                }
            }
        }

        self.entries = kept;
        Ok(destroyed)
    }

    /// 不检查 readiness，取出所有条目
    ///
    /// 只能在 device wait idle 之后使用
    pub fn drain_all(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|entry| entry.payload)
    }
}

// getters
impl<T> DeletionQueue<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&T, &Readiness)> {
        self.entries.iter().map(|entry| (&entry.payload, &entry.readiness))
    }
}

/// 渲染器中需要延迟销毁的 GPU 资源
pub enum DeferredResource {
    Buffer(GfxBuffer),
    Image(GfxImage),
    Blas(GfxAcceleration),
    MeshBuffers(GpuMeshBuffers),
    /// resize 之后被替换下来的一组 swapchain 资源，以及最后一次 present 所使用的 fence
    Swapchain {
        swapchain: GfxRenderSwapchain,
        present_fence: Option<GfxFence>,
    },
}

impl DeferredResource {
    /// 用于日志
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::Blas(_) => "blas",
            Self::MeshBuffers(_) => "mesh-buffers",
            Self::Swapchain { .. } => "swapchain",
        }
    }

    pub fn destroy(self) {
        match self {
            Self::Buffer(buffer) => buffer.destroy(),
            Self::Image(image) => image.destroy(),
            Self::Blas(blas) => blas.destroy(),
            Self::MeshBuffers(mesh) => mesh.destroy(),
            Self::Swapchain {
                swapchain,
                present_fence,
            } => {
                swapchain.destroy();
                if let Some(fence) = present_fence {
                    fence.destroy();
                }
            }
        }
    }
}

/// 渲染器使用的 readiness 检查：非阻塞地查询 fence
pub fn probe_readiness(readiness: &Readiness) -> anyhow::Result<bool> {
    match readiness {
        Readiness::Immediate => Ok(true),
        Readiness::FenceSignaled(fence) => GfxFence::from_handle(*fence).is_signaled(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use ash::vk::Handle;

    use super::*;

    fn fence(raw: u64) -> Readiness {
        Readiness::FenceSignaled(vk::Fence::from_raw(raw))
    }

    fn probe(signaled: &HashSet<u64>) -> impl FnMut(&Readiness) -> anyhow::Result<bool> + '_ {
        move |readiness| match readiness {
            Readiness::Immediate => Ok(true),
            Readiness::FenceSignaled(f) => Ok(signaled.contains(&f.as_raw())),
        }
    }

    #[test]
    fn test_immediate_entries_are_destroyed_in_order() {
        let mut queue = DeletionQueue::new();
        for i in 0..4 {
            queue.push(i, Readiness::Immediate);
        }

        let mut destroyed = Vec::new();
        let count = queue.flush(probe(&HashSet::new()), |p| destroyed.push(p)).unwrap();
        assert_eq!(count, 4);
        assert_eq!(destroyed, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pending_entries_keep_relative_order() {
        let mut queue = DeletionQueue::new();
        queue.push("a", fence(1));
        queue.push("b", Readiness::Immediate);
        queue.push("c", fence(2));
        queue.push("d", fence(1));
        queue.push("e", fence(3));

        let signaled = HashSet::from([2]);
        let mut destroyed = Vec::new();
        queue.flush(probe(&signaled), |p| destroyed.push(p)).unwrap();
        assert_eq!(destroyed, vec!["b", "c"]);

        let remaining = queue.iter().map(|(p, _)| *p).collect::<Vec<_>>();
        assert_eq!(remaining, vec!["a", "d", "e"]);
    }

    #[test]
    fn test_entry_is_destroyed_once_its_fence_signals() {
        let mut queue = DeletionQueue::new();
        queue.push(7, fence(9));

        let mut destroyed = Vec::new();
        let mut signaled = HashSet::new();
        for _ in 0..3 {
            queue.flush(probe(&signaled), |p| destroyed.push(p)).unwrap();
        }
        assert!(destroyed.is_empty());
        assert_eq!(queue.len(), 1);

        signaled.insert(9);
        queue.flush(probe(&signaled), |p| destroyed.push(p)).unwrap();
        queue.flush(probe(&signaled), |p| destroyed.push(p)).unwrap();
        assert_eq!(destroyed, vec![7]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_probe_error_keeps_unvisited_entries() {
        let mut queue = DeletionQueue::new();
        queue.push(0, Readiness::Immediate);
        queue.push(1, fence(13));
        queue.push(2, Readiness::Immediate);
        queue.push(3, fence(4));

        let mut destroyed = Vec::new();
        let result = queue.flush(
            |readiness| match readiness {
                Readiness::FenceSignaled(f) if f.as_raw() == 13 => anyhow::bail!("device lost"),
                _ => Ok(true),
            },
            |p| destroyed.push(p),
        );

        assert!(result.is_err());
        assert_eq!(destroyed, vec![0]);
        let remaining = queue.iter().map(|(p, _)| *p).collect::<Vec<_>>();
        assert_eq!(remaining, vec![1, 2, 3]);
    }

    #[test]
    fn test_inspection_has_no_side_effects() {
        let mut queue = DeletionQueue::new();
        queue.push(1, fence(5));
        queue.push(2, Readiness::Immediate);

        let readiness = queue.iter().map(|(_, r)| *r).collect::<Vec<_>>();
        assert_eq!(readiness, vec![fence(5), Readiness::Immediate]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_all_ignores_readiness() {
        let mut queue = DeletionQueue::new();
        queue.push(1, fence(5));
        queue.push(2, Readiness::Immediate);
        assert_eq!(queue.drain_all().collect::<Vec<_>>(), vec![1, 2]);
        assert!(queue.is_empty());
    }
}
