use crate::pipeline_settings::FrameLabel;

/// 帧计数器
///
/// 只有在一帧真正被提交之后才会前进，被跳过的帧（acquire 返回 OUT_OF_DATE）不计数，
/// 因此下一次 update 会继续使用同一个 frame slot
pub struct FrameCounter {
    /// 当前的帧序号，一直累加
    frame_id: u64,
}
// new & init
impl FrameCounter {
    pub fn new(init_frame_id: u64) -> Self {
        Self { frame_id: init_frame_id }
    }
}
// update
impl FrameCounter {
    #[inline]
    pub fn next_frame(&mut self) {
        self.frame_id = self.frame_id.wrapping_add(1);
    }
}
// getters
impl FrameCounter {
    const FIF_COUNT: usize = 2;
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
    #[inline]
    pub const fn fif_count() -> usize {
        Self::FIF_COUNT
    }
    #[inline]
    pub const fn frame_labels() -> [FrameLabel; Self::FIF_COUNT] {
        [FrameLabel::A, FrameLabel::B]
    }
    #[inline]
    pub fn frame_label(&self) -> FrameLabel {
        FrameLabel::from_usize(self.frame_id as usize % Self::fif_count())
    }
    /// 最近一次被提交的帧所使用的 slot
    ///
    /// 还没有任何帧提交时，返回最后一个 slot，它的 fence 处于 signaled 状态
    #[inline]
    pub fn last_submitted_label(&self) -> FrameLabel {
        let fif = Self::fif_count() as u64;
        FrameLabel::from_usize(((self.frame_id % fif + fif - 1) % fif) as usize)
    }
    #[inline]
    pub fn frame_name(&self) -> String {
        format!("[F{}{}]", self.frame_id, self.frame_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_is_frame_id_mod_fif() {
        let mut counter = FrameCounter::new(0);
        let mut labels = Vec::new();
        for _ in 0..6 {
            labels.push(*counter.frame_label());
            counter.next_frame();
        }
        assert_eq!(labels, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_slot_reappears_only_after_fif_frames() {
        let mut counter = FrameCounter::new(7);
        let first = counter.frame_label();
        for step in 1..FrameCounter::fif_count() {
            counter.next_frame();
            assert_ne!(counter.frame_label(), first, "slot reused after {step} frames");
        }
        counter.next_frame();
        assert_eq!(counter.frame_label(), first);
    }

    #[test]
    fn test_last_submitted_label() {
        let mut counter = FrameCounter::new(0);
        assert_eq!(counter.last_submitted_label(), FrameLabel::B);
        counter.next_frame();
        assert_eq!(counter.last_submitted_label(), FrameLabel::A);
        counter.next_frame();
        assert_eq!(counter.last_submitted_label(), FrameLabel::B);
    }

    #[test]
    fn test_frame_name() {
        let counter = FrameCounter::new(5);
        assert_eq!(counter.frame_name(), "[F5B]");
    }
}
