//! Hand-off 큐 -- 수집기와 분류 워커 사이의 FIFO
//!
//! [`HandoffQueue`]는 여러 태스크가 공유하는 스레드 안전 FIFO입니다.
//! `push`는 절대 블로킹하지 않으며, `try_pop`은 즉시 반환합니다.
//!
//! # 용량 정책
//! 기본은 무제한입니다. 용량을 지정하면 가득 찬 경우 드롭 정책을 적용합니다:
//! - [`DropPolicy::Oldest`]: 가장 오래된 항목을 드롭하고 새 항목을 추가
//! - [`DropPolicy::Newest`]: 새 항목을 거부

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use streammon_core::metrics as m;

use crate::error::StreamPipelineError;
use crate::source::RawItem;

/// bounded 큐의 드롭 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DropPolicy {
    /// 가장 오래된 항목 드롭
    #[default]
    Oldest,
    /// 새 항목 거부
    Newest,
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oldest => write!(f, "oldest"),
            Self::Newest => write!(f, "newest"),
        }
    }
}

impl FromStr for DropPolicy {
    type Err = StreamPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oldest" => Ok(Self::Oldest),
            "newest" => Ok(Self::Newest),
            other => Err(StreamPipelineError::Config {
                field: "pipeline.queue_drop_policy".to_owned(),
                reason: format!("unknown drop policy '{other}'"),
            }),
        }
    }
}

/// push 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 큐에 추가됨
    Queued,
    /// 가장 오래된 항목을 밀어내고 추가됨
    DisplacedOldest,
    /// 큐가 가득 차 거부됨
    Rejected,
}

/// 수집기와 워커 사이의 스레드 안전 FIFO
pub struct HandoffQueue {
    items: Mutex<VecDeque<RawItem>>,
    /// 최대 용량 (`None` = 무제한)
    capacity: Option<usize>,
    drop_policy: DropPolicy,
    total_pushed: AtomicU64,
    dropped: AtomicU64,
}

impl Default for HandoffQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl HandoffQueue {
    /// 무제한 큐를 생성합니다.
    pub fn unbounded() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity: None,
            drop_policy: DropPolicy::default(),
            total_pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// 용량 제한 큐를 생성합니다. `capacity`가 0이면 무제한입니다.
    pub fn bounded(capacity: usize, drop_policy: DropPolicy) -> Self {
        if capacity == 0 {
            return Self::unbounded();
        }
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(10_000))),
            capacity: Some(capacity),
            drop_policy,
            total_pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RawItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 항목을 추가합니다. 블로킹하지 않습니다.
    pub fn push(&self, item: RawItem) -> PushOutcome {
        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        let mut items = self.lock();

        let outcome = match self.capacity {
            Some(capacity) if items.len() >= capacity => match self.drop_policy {
                DropPolicy::Oldest => {
                    items.pop_front();
                    items.push_back(item);
                    PushOutcome::DisplacedOldest
                }
                DropPolicy::Newest => PushOutcome::Rejected,
            },
            _ => {
                items.push_back(item);
                PushOutcome::Queued
            }
        };

        let depth = items.len();
        drop(items);

        if outcome != PushOutcome::Queued {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::counter!(m::QUEUE_DROPPED_TOTAL).increment(1);
            tracing::warn!(
                dropped,
                capacity = ?self.capacity,
                policy = %self.drop_policy,
                "hand-off queue full, dropped item"
            );
        }
        metrics::gauge!(m::QUEUE_DEPTH).set(depth as f64);

        outcome
    }

    /// 가장 오래된 항목을 꺼냅니다. 비어 있으면 `None`.
    pub fn try_pop(&self) -> Option<RawItem> {
        let mut items = self.lock();
        let item = items.pop_front();
        if item.is_some() {
            metrics::gauge!(m::QUEUE_DEPTH).set(items.len() as f64);
        }
        item
    }

    /// 남은 항목을 모두 버리고 그 수를 반환합니다.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let discarded = items.len();
        items.clear();
        metrics::gauge!(m::QUEUE_DEPTH).set(0.0);
        discarded
    }

    /// 현재 적재량
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 최대 용량 (`None` = 무제한)
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// 누적 push 횟수
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed.load(Ordering::Relaxed)
    }

    /// 누적 드롭 수
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
