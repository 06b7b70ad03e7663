use ash::vk;
use itertools::Itertools;
use vkrt_gfx::commands::fence::GfxFence;

/// 为一次 present 选择 fence 的结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PresentFenceChoice {
    /// 复用池中第一个已经 signaled 的 fence
    Reuse(usize),
    /// 池未满，新建一个 fence
    Create,
    /// 池已满并且没有 signaled 的 fence，等待最久未使用的那个
    WaitLeastRecent(usize),
}

/// - `signaled`：池中每个 fence 当前是否 signaled
/// - `last_used`：池中每个 fence 最近一次被使用的序号
pub fn select_present_fence(signaled: &[bool], last_used: &[u64], capacity: usize) -> PresentFenceChoice {
    if let Some(idx) = signaled.iter().position(|s| *s) {
        return PresentFenceChoice::Reuse(idx);
    }
    if signaled.len() < capacity {
        return PresentFenceChoice::Create;
    }
    match last_used.iter().position_min() {
        Some(idx) => PresentFenceChoice::WaitLeastRecent(idx),
        None => PresentFenceChoice::Create,
    }
}

struct PresentFenceSlot {
    fence: GfxFence,
    last_used: u64,
}

/// present fence 池
///
/// 借助 VK_EXT_swapchain_maintenance1，present 完成后会 signal 对应的 fence。
/// 最近一次 present 使用的 fence 决定了旧的 swapchain 资源何时可以销毁
pub struct PresentFencePool {
    slots: Vec<PresentFenceSlot>,
    /// 最近一次 present 所用 fence 在池中的位置
    latest: Option<usize>,
    capacity: usize,
    use_tick: u64,
}

// 创建与销毁
impl PresentFencePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            latest: None,
            capacity: capacity.max(1),
            use_tick: 0,
        }
    }

    /// 调用者需要保证 present engine 已经不再使用这些 fence
    pub fn destroy(self) {
        log::debug!("destroying {} present fences", self.slots.len());
        self.slots.into_iter().for_each(|slot| slot.fence.destroy());
    }
}

// tools
impl PresentFencePool {
    /// 为下一次 present 取出一个处于 unsignaled 状态的 fence
    ///
    /// 通常不会阻塞，只有池满且没有任何 fence signaled 时才会等待，超时视为错误
    pub fn acquire(&mut self, timeout_ns: u64) -> anyhow::Result<vk::Fence> {
        let _span = tracy_client::span!("PresentFencePool::acquire");

        let signaled = self.slots.iter().map(|slot| slot.fence.is_signaled()).collect::<anyhow::Result<Vec<_>>>()?;
        let last_used = self.slots.iter().map(|slot| slot.last_used).collect_vec();

        let idx = match select_present_fence(&signaled, &last_used, self.capacity) {
            PresentFenceChoice::Reuse(idx) => {
                self.slots[idx].fence.reset()?;
                idx
            }
            PresentFenceChoice::Create => {
                let fence = GfxFence::new(false, &format!("present-{}", self.slots.len()))?;
                log::debug!("present fence pool grows to {}", self.slots.len() + 1);
                self.slots.push(PresentFenceSlot { fence, last_used: 0 });
                self.slots.len() - 1
            }
            PresentFenceChoice::WaitLeastRecent(idx) => {
                log::warn!("present fence pool is exhausted ({}), waiting on fence {idx}", self.capacity);
                self.slots[idx].fence.wait(timeout_ns)?;
                self.slots[idx].fence.reset()?;
                idx
            }
        };

        self.use_tick += 1;
        self.slots[idx].last_used = self.use_tick;
        self.latest = Some(idx);
        Ok(self.slots[idx].fence.handle())
    }

    /// 取出最近一次 present 所用的 fence，并在它原来的位置放入一个新的 signaled fence
    ///
    /// 取出的 fence 与旧的 swapchain 一起进入延迟销毁队列；还没有任何 present 时返回 None
    pub fn take_latest(&mut self) -> anyhow::Result<Option<GfxFence>> {
        let Some(idx) = self.latest else {
            return Ok(None);
        };

        let replacement = GfxFence::new(true, &format!("present-{idx}"))?;
        let old = std::mem::replace(&mut self.slots[idx].fence, replacement);
        Ok(Some(old))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_signaled_fence_is_reused() {
        assert_eq!(select_present_fence(&[false, true, true], &[3, 1, 2], 8), PresentFenceChoice::Reuse(1));
    }

    #[test]
    fn test_empty_pool_creates() {
        assert_eq!(select_present_fence(&[], &[], 8), PresentFenceChoice::Create);
    }

    #[test]
    fn test_pool_grows_while_under_capacity() {
        assert_eq!(select_present_fence(&[false, false], &[1, 2], 3), PresentFenceChoice::Create);
    }

    #[test]
    fn test_full_pool_waits_on_least_recent() {
        assert_eq!(
            select_present_fence(&[false, false, false], &[7, 4, 9], 3),
            PresentFenceChoice::WaitLeastRecent(1)
        );
    }

    #[test]
    fn test_signaled_fence_is_preferred_over_growth() {
        assert_eq!(select_present_fence(&[false, true], &[1, 2], 8), PresentFenceChoice::Reuse(1));
    }
}
