use dashmap::DashMap;
use std::sync::Arc;

use crate::models::DateWindow;

/// 账本合并使用的占用键
pub const LEDGER_KEY: &str = "ledger";

/// 进行中的 (渠道, 窗口) 集合
/// 同一渠道的重叠窗口不能同时执行 delete-then-insert
#[derive(Clone, Default)]
pub struct InFlight {
    windows: Arc<DashMap<String, Vec<DateWindow>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// 占用成功返回守卫, 守卫析构时释放; 与进行中的窗口重叠时返回 None
    pub fn try_acquire(&self, key: &str, window: DateWindow) -> Option<InFlightGuard> {
        let mut running = self.windows.entry(key.to_string()).or_default();
        if running.iter().any(|w| w.overlaps(&window)) {
            return None;
        }
        running.push(window);
        drop(running);

        Some(InFlightGuard {
            windows: self.windows.clone(),
            key: key.to_string(),
            window,
        })
    }

    /// 全部占用或全部不占用
    pub fn try_acquire_all<'a, I>(&self, keys: I, window: DateWindow) -> Option<Vec<InFlightGuard>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut guards = Vec::new();
        for key in keys {
            // 失败时已取得的守卫随 Vec 一起释放
            guards.push(self.try_acquire(key, window)?);
        }
        Some(guards)
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.windows.get(key).is_some_and(|w| !w.is_empty())
    }
}

pub struct InFlightGuard {
    windows: Arc<DashMap<String, Vec<DateWindow>>>,
    key: String,
    window: DateWindow,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(mut running) = self.windows.get_mut(&self.key) {
            if let Some(pos) = running.iter().position(|w| *w == self.window) {
                running.swap_remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window(a: u32, b: u32) -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2025, 10, a).unwrap(),
            NaiveDate::from_ymd_opt(2025, 10, b).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn overlapping_window_is_rejected_until_released() {
        let in_flight = InFlight::new();
        let guard = in_flight.try_acquire("shopify", window(1, 5)).unwrap();
        assert!(in_flight.try_acquire("shopify", window(5, 9)).is_none());
        assert!(in_flight.try_acquire("shopify", window(6, 9)).is_some());
        assert!(in_flight.try_acquire("amazon", window(1, 5)).is_some());

        drop(guard);
        assert!(in_flight.try_acquire("shopify", window(1, 5)).is_some());
        assert!(!in_flight.is_running("shopify"));
    }

    #[test]
    fn acquire_all_releases_partial_set_on_conflict() {
        let in_flight = InFlight::new();
        let _held = in_flight.try_acquire("amazon", window(1, 1)).unwrap();
        assert!(in_flight
            .try_acquire_all(["shopify", "amazon"], window(1, 1))
            .is_none());
        assert!(!in_flight.is_running("shopify"));
    }
}
