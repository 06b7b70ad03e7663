use anyhow::Context;
use ash::vk;
use vkrt_gfx::{raytracing::acceleration::BlasInstance, swapchain::render_swapchain::AcquireOutcome};

use crate::{
    frame_counter::FrameCounter,
    pipeline_settings::FrameLabel,
    tlas_request::{TlasRequest, TlasWork},
};

/// framebuffer 的某一维为 0 时（例如窗口最小化），无法创建 swapchain
#[inline]
pub fn is_renderable_extent(extent: [u32; 2]) -> bool {
    extent[0] != 0 && extent[1] != 0
}

/// 一次 update 的结果
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// 本帧已经提交并 present
    Presented,
    /// 本帧被跳过，没有提交任何工作，frame counter 不前进
    Skipped,
}

/// 待处理的 resize 请求在本帧的处理方式
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResizeAction {
    /// 窗口或 surface 的尺寸为 0，保留请求并跳过本帧
    Skip,
    Rebuild([u32; 2]),
}

/// 窗口尺寸非 0 时才会查询 surface
pub fn plan_resize(
    window_extent: [u32; 2],
    surface_extent: impl FnOnce([u32; 2]) -> anyhow::Result<vk::Extent2D>,
) -> anyhow::Result<ResizeAction> {
    if !is_renderable_extent(window_extent) {
        return Ok(ResizeAction::Skip);
    }
    let surface = surface_extent(window_extent)?;
    if !is_renderable_extent([surface.width, surface.height]) {
        return Ok(ResizeAction::Skip);
    }
    Ok(ResizeAction::Rebuild(window_extent))
}

/// 一帧中与 GPU、窗口交互的各个步骤，由 [`FrameSchedule::run_frame`] 按顺序调用
pub trait FrameSteps {
    /// 等待 slot 上一次提交的工作完成
    fn wait_previous(&mut self, label: FrameLabel) -> anyhow::Result<()>;
    fn flush_deletions(&mut self, label: FrameLabel) -> anyhow::Result<()>;

    /// 收集窗口的 resize 通知，返回是否有待处理的 resize
    fn poll_resize(&mut self) -> bool;
    fn window_extent(&self) -> [u32; 2];
    fn surface_extent(&self, window_extent: [u32; 2]) -> anyhow::Result<vk::Extent2D>;
    /// 旧的 swapchain 资源进入 `label` 的延迟销毁队列
    fn rebuild_swapchain(&mut self, label: FrameLabel, extent: [u32; 2]) -> anyhow::Result<()>;

    fn acquire_image(&mut self, label: FrameLabel) -> anyhow::Result<AcquireOutcome>;
    fn record_and_submit(
        &mut self,
        label: FrameLabel,
        image_index: u32,
        tlas_work: Option<TlasWork<'_>>,
    ) -> anyhow::Result<()>;
    fn present_image(&mut self, image_index: u32) -> anyhow::Result<()>;
}

/// 帧的调度状态：帧计数器与 TLAS 倒计时
///
/// 两者都只在一帧真正提交时才会前进
pub struct FrameSchedule {
    frame_counter: FrameCounter,
    tlas_request: TlasRequest,
}

impl Default for FrameSchedule {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl FrameSchedule {
    pub fn new() -> Self {
        Self {
            frame_counter: FrameCounter::new(0),
            tlas_request: TlasRequest::new(),
        }
    }
}

// update
impl FrameSchedule {
    /// 等待 -> 延迟销毁 -> resize -> acquire -> 录制并提交 -> present
    ///
    /// resize 无法完成或 acquire 返回 OUT_OF_DATE 时跳过本帧
    pub fn run_frame(&mut self, steps: &mut impl FrameSteps) -> anyhow::Result<FrameOutcome> {
        let label = self.frame_counter.frame_label();
        let frame_name = self.frame_counter.frame_name();

        // 等待 fif 的同一帧渲染完成
        steps.wait_previous(label).with_context(|| format!("{frame_name} wait for previous submission"))?;
        steps.flush_deletions(label)?;

        if steps.poll_resize() {
            let window_extent = steps.window_extent();
            match plan_resize(window_extent, |extent| steps.surface_extent(extent))? {
                ResizeAction::Skip => {
                    log::trace!("{frame_name} skipped: window extent {window_extent:?} cannot be presented");
                    return Ok(FrameOutcome::Skipped);
                }
                ResizeAction::Rebuild(extent) => {
                    steps.rebuild_swapchain(label, extent)?;
                    log::info!("{frame_name} swapchain rebuilt for {extent:?}");
                }
            }
        }

        let image_index = match steps.acquire_image(label)? {
            AcquireOutcome::Acquired { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => {
                log::debug!("{frame_name} skipped: swapchain out of date");
                return Ok(FrameOutcome::Skipped);
            }
        };

        steps.record_and_submit(label, image_index, self.tlas_request.take_pending())?;
        steps.present_image(image_index)?;

        self.frame_counter.next_frame();
        Ok(FrameOutcome::Presented)
    }

    pub fn set_tlas_build(&mut self, instances: Vec<BlasInstance>) {
        self.tlas_request.set_build(instances);
    }

    pub fn set_tlas_update(&mut self, instances: Vec<BlasInstance>) {
        self.tlas_request.set_update(instances);
    }
}

// getters
impl FrameSchedule {
    #[inline]
    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    #[inline]
    pub fn tlas_request(&self) -> &TlasRequest {
        &self.tlas_request
    }

    /// 延迟销毁的资源放入最近一次提交的帧的 slot
    #[inline]
    pub fn deletion_target(&self) -> FrameLabel {
        self.frame_counter.last_submitted_label()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(FrameLabel),
        Flush(FrameLabel),
        Rebuild(FrameLabel, [u32; 2]),
        Acquire(FrameLabel),
        Record { label: FrameLabel, tlas_instances: Option<usize> },
        Present(u32),
    }

    struct RecordingSteps {
        calls: Vec<Call>,
        resize_pending: bool,
        window_extent: [u32; 2],
        surface_extent: [u32; 2],
        surface_queries: Cell<usize>,
        out_of_date: bool,
    }

    impl RecordingSteps {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                resize_pending: false,
                window_extent: [1280, 720],
                surface_extent: [1280, 720],
                surface_queries: Cell::new(0),
                out_of_date: false,
            }
        }
    }

    impl FrameSteps for RecordingSteps {
        fn wait_previous(&mut self, label: FrameLabel) -> anyhow::Result<()> {
            self.calls.push(Call::Wait(label));
            Ok(())
        }

        fn flush_deletions(&mut self, label: FrameLabel) -> anyhow::Result<()> {
            self.calls.push(Call::Flush(label));
            Ok(())
        }

        fn poll_resize(&mut self) -> bool {
            self.resize_pending
        }

        fn window_extent(&self) -> [u32; 2] {
            self.window_extent
        }

        fn surface_extent(&self, _window_extent: [u32; 2]) -> anyhow::Result<vk::Extent2D> {
            self.surface_queries.set(self.surface_queries.get() + 1);
            Ok(vk::Extent2D {
                width: self.surface_extent[0],
                height: self.surface_extent[1],
            })
        }

        fn rebuild_swapchain(&mut self, label: FrameLabel, extent: [u32; 2]) -> anyhow::Result<()> {
            self.calls.push(Call::Rebuild(label, extent));
            self.resize_pending = false;
            Ok(())
        }

        fn acquire_image(&mut self, label: FrameLabel) -> anyhow::Result<AcquireOutcome> {
            self.calls.push(Call::Acquire(label));
            if self.out_of_date {
                self.out_of_date = false;
                self.resize_pending = true;
                return Ok(AcquireOutcome::OutOfDate);
            }
            Ok(AcquireOutcome::Acquired {
                image_index: 2,
                suboptimal: false,
            })
        }

        fn record_and_submit(
            &mut self,
            label: FrameLabel,
            _image_index: u32,
            tlas_work: Option<TlasWork<'_>>,
        ) -> anyhow::Result<()> {
            self.calls.push(Call::Record {
                label,
                tlas_instances: tlas_work.map(|work| work.instances.len()),
            });
            Ok(())
        }

        fn present_image(&mut self, image_index: u32) -> anyhow::Result<()> {
            self.calls.push(Call::Present(image_index));
            Ok(())
        }
    }

    fn extent(width: u32, height: u32) -> anyhow::Result<vk::Extent2D> {
        Ok(vk::Extent2D { width, height })
    }

    #[test]
    fn test_plan_resize() {
        assert_eq!(plan_resize([800, 600], |_| extent(800, 600)).unwrap(), ResizeAction::Rebuild([800, 600]));
        assert_eq!(plan_resize([800, 600], |_| extent(0, 0)).unwrap(), ResizeAction::Skip);
        assert_eq!(plan_resize([800, 600], |_| extent(800, 0)).unwrap(), ResizeAction::Skip);
        assert!(plan_resize([800, 600], |_| Err(anyhow::anyhow!("surface lost"))).is_err());
    }

    #[test]
    fn test_minimized_window_does_not_query_surface() {
        let action = plan_resize([0, 720], |_| -> anyhow::Result<vk::Extent2D> {
            panic!("surface queried for a minimized window")
        });
        assert_eq!(action.unwrap(), ResizeAction::Skip);
        assert!(!is_renderable_extent([0, 0]));
        assert!(is_renderable_extent([1, 1]));
    }

    #[test]
    fn test_presented_frame_order() {
        let mut schedule = FrameSchedule::new();
        let mut steps = RecordingSteps::new();
        steps.resize_pending = true;

        assert_eq!(schedule.run_frame(&mut steps).unwrap(), FrameOutcome::Presented);
        assert_eq!(steps.calls, vec![
            Call::Wait(FrameLabel::A),
            Call::Flush(FrameLabel::A),
            Call::Rebuild(FrameLabel::A, [1280, 720]),
            Call::Acquire(FrameLabel::A),
            Call::Record {
                label: FrameLabel::A,
                tlas_instances: Some(0)
            },
            Call::Present(2),
        ]);
        assert_eq!(schedule.frame_counter().frame_id(), 1);
        assert_eq!(schedule.frame_counter().frame_label(), FrameLabel::B);
    }

    #[test]
    fn test_zero_surface_extent_skips_before_acquire() {
        let mut schedule = FrameSchedule::new();
        let mut steps = RecordingSteps::new();
        steps.resize_pending = true;
        steps.surface_extent = [0, 0];

        assert_eq!(schedule.run_frame(&mut steps).unwrap(), FrameOutcome::Skipped);
        assert_eq!(steps.calls, vec![Call::Wait(FrameLabel::A), Call::Flush(FrameLabel::A)]);
        assert_eq!(steps.surface_queries.get(), 1);
        assert!(steps.resize_pending);

        // 跳过的帧不消耗 TLAS 倒计时，也不推进帧计数
        assert_eq!(schedule.tlas_request().frames_remaining(), FrameCounter::fif_count());
        assert_eq!(schedule.frame_counter().frame_id(), 0);

        // surface 恢复后在同一个 slot 上重建
        steps.surface_extent = [1280, 720];
        steps.calls.clear();
        assert_eq!(schedule.run_frame(&mut steps).unwrap(), FrameOutcome::Presented);
        assert_eq!(steps.calls[2], Call::Rebuild(FrameLabel::A, [1280, 720]));
        assert!(!steps.resize_pending);
    }

    #[test]
    fn test_minimized_window_skips_without_rebuild() {
        let mut schedule = FrameSchedule::new();
        let mut steps = RecordingSteps::new();
        steps.resize_pending = true;
        steps.window_extent = [0, 0];

        assert_eq!(schedule.run_frame(&mut steps).unwrap(), FrameOutcome::Skipped);
        assert_eq!(steps.surface_queries.get(), 0);
        assert_eq!(steps.calls.len(), 2);
    }

    #[test]
    fn test_out_of_date_skip_keeps_tlas_countdown() {
        let mut schedule = FrameSchedule::new();
        schedule.set_tlas_build(Vec::new());
        let mut steps = RecordingSteps::new();
        steps.out_of_date = true;

        assert_eq!(schedule.run_frame(&mut steps).unwrap(), FrameOutcome::Skipped);
        assert_eq!(schedule.tlas_request().frames_remaining(), FrameCounter::fif_count());
        assert!(!steps.calls.iter().any(|call| matches!(call, Call::Record { .. })));

        // 下一次 update 仍然使用同一个 slot，并先处理 OUT_OF_DATE 引起的 resize
        steps.calls.clear();
        assert_eq!(schedule.run_frame(&mut steps).unwrap(), FrameOutcome::Presented);
        assert_eq!(steps.calls[0], Call::Wait(FrameLabel::A));
        assert_eq!(steps.calls[2], Call::Rebuild(FrameLabel::A, [1280, 720]));
        assert_eq!(schedule.tlas_request().frames_remaining(), FrameCounter::fif_count() - 1);
    }

    #[test]
    fn test_tlas_countdown_spans_fif_presented_frames() {
        let mut schedule = FrameSchedule::new();
        let mut steps = RecordingSteps::new();
        for _ in 0..4 {
            schedule.run_frame(&mut steps).unwrap();
        }
        let recorded = steps
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Record { label, tlas_instances } => Some((*label, *tlas_instances)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(recorded, vec![
            (FrameLabel::A, Some(0)),
            (FrameLabel::B, Some(0)),
            (FrameLabel::A, None),
            (FrameLabel::B, None),
        ]);
    }

    #[test]
    fn test_deletion_target_is_last_submitted_slot() {
        let mut schedule = FrameSchedule::new();
        let mut steps = RecordingSteps::new();

        // 尚未提交时指向最后一个 slot，它的 fence 创建时就是 signaled
        assert_eq!(schedule.deletion_target(), FrameLabel::B);

        schedule.run_frame(&mut steps).unwrap();
        assert_eq!(schedule.deletion_target(), FrameLabel::A);

        // 被跳过的帧不改变目标
        steps.out_of_date = true;
        assert_eq!(schedule.run_frame(&mut steps).unwrap(), FrameOutcome::Skipped);
        assert_eq!(schedule.deletion_target(), FrameLabel::A);

        schedule.run_frame(&mut steps).unwrap();
        assert_eq!(schedule.deletion_target(), FrameLabel::B);
    }
}
