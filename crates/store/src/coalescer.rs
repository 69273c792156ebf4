//! 키별 병합 코얼레서
//!
//! 쓰기 경로는 read-modify-write를 하지 않습니다. 쓰는 쪽은 델타
//! 바이트를 큐에 넣기만 하고, 키마다 하나씩 떠 있는 코얼레서 태스크가
//! 주기 타이머에 맞춰 큐를 비웁니다: 현재 값을 읽고, 델타들을 제출
//! 순서대로(FIFO) 접어 넣고, 결과를 한 번에 기록합니다. 경합이 심한
//! 키일수록 디스크 쓰기가 플러시당 한 번으로 뭉개집니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::LogEngine;
use crate::error::StoreError;
use crate::merge::MergeFn;

/// 키 하나의 병합 큐 핸들
///
/// 드롭하거나 [`stop`](Self::stop)을 부르면 태스크가 남은 델타를
/// 플러시하고 종료합니다.
pub(crate) struct MergeOperator {
    key: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    handle: JoinHandle<()>,
}

impl MergeOperator {
    /// 코얼레서 태스크를 스폰합니다.
    pub(crate) fn spawn(
        engine: Arc<LogEngine>,
        key: String,
        merge: MergeFn,
        window: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_coalescer(
            engine,
            key.clone(),
            merge,
            window,
            rx,
            cancel,
        ));
        Self { key, tx, handle }
    }

    /// 델타를 큐에 넣습니다. 블로킹하지 않습니다.
    pub(crate) fn add(&self, delta: Vec<u8>) -> Result<(), StoreError> {
        self.tx
            .send(delta)
            .map_err(|_| StoreError::OperatorStopped(self.key.clone()))
    }

    /// 태스크를 정지시키고 마지막 플러시를 기다립니다.
    pub(crate) async fn stop(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            warn!(key = %self.key, error = %e, "merge coalescer task failed");
        }
    }
}

async fn run_coalescer(
    engine: Arc<LogEngine>,
    key: String,
    merge: MergeFn,
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(window);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut pending: Vec<Vec<u8>> = Vec::new();

    loop {
        tokio::select! {
            maybe_delta = rx.recv() => match maybe_delta {
                Some(delta) => pending.push(delta),
                // 송신측이 모두 닫혔다 — 마지막 플러시 후 종료
                None => break,
            },
            _ = interval.tick() => flush(&engine, &key, merge, &mut pending),
            _ = cancel.cancelled() => break,
        }
    }

    // 종료 직전에 도착해 있던 델타까지 수거한다
    while let Ok(delta) = rx.try_recv() {
        pending.push(delta);
    }
    flush(&engine, &key, merge, &mut pending);
    debug!(key = %key, "merge coalescer stopped");
}

/// 큐에 쌓인 델타를 현재 값에 접어 넣고 한 번의 쓰기로 반영합니다.
///
/// 실패한 갱신은 재시도하지 않습니다 — "적용되지 않은 갱신"으로
/// 로그에만 남습니다.
fn flush(engine: &LogEngine, key: &str, merge: MergeFn, pending: &mut Vec<Vec<u8>>) {
    if pending.is_empty() {
        return;
    }
    let deltas = std::mem::take(pending);
    let count = deltas.len();

    let current = match engine.get(key.as_bytes()) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, dropped = count, "merge flush read failed, updates did not apply");
            return;
        }
    };

    let mut value: Option<Vec<u8>> = current;
    for delta in deltas {
        value = Some(match value {
            // 저장된 값이 없으면 첫 델타가 그대로 초기값이 된다
            None => delta,
            Some(current) => merge(key, &current, &delta),
        });
    }

    if let Some(bytes) = value {
        match engine.put(key.as_bytes(), &bytes) {
            Ok(()) => debug!(key, merged = count, "merge flush applied"),
            Err(e) => {
                warn!(key, error = %e, dropped = count, "merge flush write failed, updates did not apply");
            }
        }
    }
}
