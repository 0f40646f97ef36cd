use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::services::registry::InstanceAddress;

/// 按服务维护的轮询游标，仅存在于内存中，进程重启后归零
#[derive(Debug, Clone, Default)]
pub struct RoundRobin {
    cursors: Arc<DashMap<String, AtomicUsize>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回本次请求的候选实例：首选实例，以及（若存在）用于重试的另一个实例
    pub fn candidates(
        &self,
        service_name: &str,
        instances: &[InstanceAddress],
    ) -> Vec<InstanceAddress> {
        if instances.is_empty() {
            return Vec::new();
        }

        let idx = self.next_index(service_name) % instances.len();
        let mut candidates = vec![instances[idx].clone()];
        if instances.len() > 1 {
            candidates.push(instances[(idx + 1) % instances.len()].clone());
        }
        candidates
    }

    fn next_index(&self, service_name: &str) -> usize {
        if let Some(cursor) = self.cursors.get(service_name) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(service_name.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}
