use vkrt_gfx::raytracing::acceleration::BlasInstance;

use crate::frame_counter::FrameCounter;

/// 本帧需要对当前 slot 的 TLAS 执行的操作
#[derive(Debug)]
pub struct TlasWork<'a> {
    pub instances: &'a [BlasInstance],
    /// 由 `set_tlas_update` 发起，条件允许时进行原地 refit
    pub refit_requested: bool,
}

/// TLAS 倒计时
///
/// 每个 frame slot 持有各自的 TLAS。新的 instance 列表需要在接下来的 N 帧中
/// 依次写入每个 slot，因此每次请求都会把倒计时重置为 N
pub struct TlasRequest {
    instances: Vec<BlasInstance>,
    refit_requested: bool,
    frames_remaining: usize,
}

impl Default for TlasRequest {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl TlasRequest {
    /// 初始状态是一个空的构建请求，第一帧就会得到合法的空 TLAS
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
            refit_requested: false,
            frames_remaining: FrameCounter::fif_count(),
        }
    }
}

// update
impl TlasRequest {
    pub fn set_build(&mut self, instances: Vec<BlasInstance>) {
        self.instances = instances;
        self.refit_requested = false;
        self.frames_remaining = FrameCounter::fif_count();
    }

    pub fn set_update(&mut self, instances: Vec<BlasInstance>) {
        self.instances = instances;
        self.refit_requested = true;
        self.frames_remaining = FrameCounter::fif_count();
    }

    /// 倒计时为正时返回本帧的工作并递减倒计时
    pub fn take_pending(&mut self) -> Option<TlasWork<'_>> {
        if self.frames_remaining == 0 {
            return None;
        }
        self.frames_remaining -= 1;
        Some(TlasWork {
            instances: &self.instances,
            refit_requested: self.refit_requested,
        })
    }
}

// getters
impl TlasRequest {
    #[inline]
    pub fn frames_remaining(&self) -> usize {
        self.frames_remaining
    }

    #[inline]
    pub fn instances(&self) -> &[BlasInstance] {
        &self.instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instances(count: usize) -> Vec<BlasInstance> {
        (0..count)
            .map(|i| BlasInstance {
                transform: glam::Mat4::from_translation(glam::vec3(i as f32, 0.0, 0.0)),
                instance_index: i as u32,
                blas_address: 0x1000,
            })
            .collect()
    }

    fn drain(request: &mut TlasRequest, frames: usize) -> Vec<(usize, bool)> {
        (0..frames)
            .filter_map(|_| request.take_pending().map(|work| (work.instances.len(), work.refit_requested)))
            .collect()
    }

    #[test]
    fn test_initial_request_builds_empty_tlas_for_every_slot() {
        let mut request = TlasRequest::new();
        assert_eq!(drain(&mut request, 5), vec![(0, false); FrameCounter::fif_count()]);
    }

    #[test]
    fn test_build_rebuilds_exactly_fif_times() {
        let mut request = TlasRequest::new();
        drain(&mut request, 5);

        request.set_build(instances(3));
        let n = FrameCounter::fif_count();
        for _ in 0..n {
            let work = request.take_pending().unwrap();
            assert_eq!(work.instances.len(), 3);
            assert!(!work.refit_requested);
        }
        // 第 N+1 帧不会再重建
        assert!(request.take_pending().is_none());
        assert_eq!(request.frames_remaining(), 0);
    }

    #[test]
    fn test_request_resets_countdown() {
        let mut request = TlasRequest::new();
        request.set_build(instances(2));
        assert!(request.take_pending().is_some());

        request.set_update(instances(2));
        assert_eq!(request.frames_remaining(), FrameCounter::fif_count());
        assert_eq!(drain(&mut request, 5), vec![(2, true); FrameCounter::fif_count()]);
    }

    #[test]
    fn test_latest_request_wins() {
        let mut request = TlasRequest::new();
        request.set_update(instances(4));
        request.set_build(instances(1));
        let work = request.take_pending().unwrap();
        assert_eq!(work.instances.len(), 1);
        assert!(!work.refit_requested);
        assert_eq!(request.instances().len(), 1);
    }
}
