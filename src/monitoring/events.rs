use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, histogram};
use parking_lot::RwLock;
use tracing::{info, warn};

use super::metrics::prometheus_enabled;

/// 提交生命周期通知。仅供观察, 不得影响控制流。
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    Sent {
        index: usize,
        signature: String,
        attempt: u32,
    },
    Confirmed {
        index: usize,
        signature: String,
        latency_ms: u64,
    },
    Failed {
        index: usize,
        error: String,
        attempt: u32,
    },
    RetryScheduled {
        index: usize,
        attempt: u32,
        delay_ms: u64,
    },
    FeeSpikeDetected {
        index: usize,
        proposed: u64,
        threshold: u64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Sent,
    Confirmed,
    Failed,
    RetryScheduled,
    FeeSpikeDetected,
}

impl LifecycleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::Sent { .. } => EventKind::Sent,
            LifecycleEvent::Confirmed { .. } => EventKind::Confirmed,
            LifecycleEvent::Failed { .. } => EventKind::Failed,
            LifecycleEvent::RetryScheduled { .. } => EventKind::RetryScheduled,
            LifecycleEvent::FeeSpikeDetected { .. } => EventKind::FeeSpikeDetected,
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

impl<F> EventListener for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) {
        self(event)
    }
}

/// 按事件种类注册监听器的显式事件总线。
/// 测试可以只订阅感兴趣的种类, 断言精确的事件序列。
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<EventKind, Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn EventListener>) {
        self.listeners.write().entry(kind).or_default().push(listener);
    }

    pub fn emit(&self, event: LifecycleEvent) {
        log_and_count(&event);
        let listeners = {
            let map = self.listeners.read();
            map.get(&event.kind()).cloned().unwrap_or_default()
        };
        for listener in listeners {
            listener.on_event(&event);
        }
    }
}

fn log_and_count(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Sent {
            index,
            signature,
            attempt,
        } => {
            info!(
                target: "monitoring::lifecycle",
                event = "sent",
                index,
                signature = signature.as_str(),
                attempt,
                "交易已发送"
            );
            if prometheus_enabled() {
                counter!("medici_submissions_sent_total").increment(1);
            }
        }
        LifecycleEvent::Confirmed {
            index,
            signature,
            latency_ms,
        } => {
            info!(
                target: "monitoring::lifecycle",
                event = "confirmed",
                index,
                signature = signature.as_str(),
                latency_ms,
                "交易已确认"
            );
            if prometheus_enabled() {
                counter!("medici_submissions_confirmed_total").increment(1);
                histogram!("medici_confirmation_latency_ms").record(*latency_ms as f64);
            }
        }
        LifecycleEvent::Failed {
            index,
            error,
            attempt,
        } => {
            warn!(
                target: "monitoring::lifecycle",
                event = "failed",
                index,
                attempt,
                error = error.as_str(),
                "交易失败"
            );
            if prometheus_enabled() {
                counter!("medici_submissions_failed_total").increment(1);
            }
        }
        LifecycleEvent::RetryScheduled {
            index,
            attempt,
            delay_ms,
        } => {
            info!(
                target: "monitoring::lifecycle",
                event = "retry",
                index,
                attempt,
                delay_ms,
                "安排重试"
            );
            if prometheus_enabled() {
                counter!("medici_submission_retries_total").increment(1);
            }
        }
        LifecycleEvent::FeeSpikeDetected {
            index,
            proposed,
            threshold,
        } => {
            warn!(
                target: "monitoring::lifecycle",
                event = "fee_spike",
                index,
                proposed,
                threshold,
                "检测到优先费尖峰, 跳过提交"
            );
            if prometheus_enabled() {
                counter!("medici_fee_spikes_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn listeners_only_see_their_kind_in_order() {
        let bus = EventBus::new();
        let seen: Arc<Mutex<Vec<LifecycleEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(
            EventKind::Sent,
            Arc::new(move |event: &LifecycleEvent| sink.lock().push(event.clone())),
        );

        bus.emit(LifecycleEvent::FeeSpikeDetected {
            index: 0,
            proposed: 10,
            threshold: 5,
        });
        bus.emit(LifecycleEvent::Sent {
            index: 1,
            signature: "a".into(),
            attempt: 0,
        });
        bus.emit(LifecycleEvent::Sent {
            index: 2,
            signature: "b".into(),
            attempt: 1,
        });

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].kind(), EventKind::Sent);
        match (&seen[0], &seen[1]) {
            (
                LifecycleEvent::Sent { index: first, .. },
                LifecycleEvent::Sent { index: second, .. },
            ) => {
                assert_eq!((*first, *second), (1, 2));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn emit_without_listeners_is_harmless() {
        let bus = EventBus::new();
        bus.emit(LifecycleEvent::Failed {
            index: 0,
            error: "x".into(),
            attempt: 3,
        });
    }
}
