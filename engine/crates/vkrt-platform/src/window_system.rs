use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 进程中是否已经存在一个 WindowSystem
static WINDOW_SYSTEM_ALIVE: AtomicBool = AtomicBool::new(false);

/// 窗口子系统的句柄
///
/// 进程中同时最多存在一个。所有窗口都持有它的 `Rc`，最后一个 `Rc` 被 drop 时窗口子系统被释放，
/// 之后可以再次初始化
///
/// 不是 `Send`，窗口相关的操作只能发生在创建它的线程上
#[derive(Debug)]
pub struct WindowSystem {
    _not_send: PhantomData<*const ()>,
}

impl WindowSystem {
    /// 初始化窗口子系统；如果已经存在一个存活的实例，返回错误
    pub fn init() -> anyhow::Result<Rc<Self>> {
        let acquired = WINDOW_SYSTEM_ALIVE.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire);
        anyhow::ensure!(acquired.is_ok(), "window system is already initialized");

        log::info!("window system initialized");
        Ok(Rc::new(Self { _not_send: PhantomData }))
    }

    /// 当前进程中是否有存活的实例
    #[inline]
    pub fn is_alive() -> bool {
        WINDOW_SYSTEM_ALIVE.load(Ordering::Acquire)
    }
}

impl Drop for WindowSystem {
    fn drop(&mut self) {
        WINDOW_SYSTEM_ALIVE.store(false, Ordering::Release);
        log::info!("window system released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 全局状态只在这一个 test 中访问，避免与其他 test 并行时互相干扰
    #[test]
    fn test_single_live_instance() {
        assert!(!WindowSystem::is_alive());

        let system = WindowSystem::init().unwrap();
        assert!(WindowSystem::is_alive());
        assert!(WindowSystem::init().is_err());

        // 多个窗口共享同一个句柄
        let window_a = Rc::clone(&system);
        let window_b = Rc::clone(&system);
        drop(system);
        drop(window_a);
        assert!(WindowSystem::is_alive());

        drop(window_b);
        assert!(!WindowSystem::is_alive());

        // 释放之后可以重新初始化
        let again = WindowSystem::init().unwrap();
        assert!(WindowSystem::is_alive());
        drop(again);
        assert!(!WindowSystem::is_alive());
    }
}
