//! 저장소 외관 — 병합 연산자 레지스트리와 조회 경로
//!
//! 쓰기는 전부 키별 코얼레서 큐로 들어가고, 읽기는 엔진을 직접
//! 조회합니다. 읽기가 대기 중인 병합 큐를 플러시하지는 않으므로
//! 한 코얼레싱 윈도우 안의 읽기는 이전 값을 볼 수 있습니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use lanaudit_core::config::StoreConfig;
use lanaudit_core::types::{Action, ActionsByIp, IpSet, Meta};

use crate::codec::{decode, encode};
use crate::coalescer::MergeOperator;
use crate::engine::{GcOutcome, LogEngine};
use crate::error::StoreError;
use crate::merge::{merge_actions, merge_ips, merge_meta};

/// 전체 IP 집합이 영속되는 단일 키
const IPS_KEY: &str = "ips";

/// IP별 키의 병합 플러시 주기
const PER_KEY_MERGE_WINDOW: Duration = Duration::from_millis(100);

/// 엔진 GC 주기와 재작성 임계치
const GC_INTERVAL: Duration = Duration::from_secs(120);
const GC_REWRITE_THRESHOLD: f64 = 0.7;

fn meta_key(ip: &str) -> String {
    format!("{ip}-meta")
}

fn action_key(ip: &str) -> String {
    format!("{ip}-action")
}

/// 임베디드 append-merge 저장소
///
/// 디스크 상태와 병합 큐를 단독 소유합니다. 같은 키에 대한 병합은
/// 제출 순서대로 적용되지만, 키가 다르면 순서 보장이 없습니다.
pub struct Store {
    engine: Arc<LogEngine>,
    cancel: CancellationToken,

    meta_ops: Mutex<HashMap<String, MergeOperator>>,
    action_ops: Mutex<HashMap<String, MergeOperator>>,
    ips_op: Mutex<Option<MergeOperator>>,

    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// 데이터 디렉토리를 열고 백그라운드 GC와 `ips` 병합기를 띄웁니다.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        debug!("creating data facility");
        let engine = Arc::new(LogEngine::open(&config.data_dir())?);
        let cancel = CancellationToken::new();

        let ips_op = MergeOperator::spawn(
            Arc::clone(&engine),
            IPS_KEY.to_owned(),
            merge_ips,
            Duration::from_millis(config.ips_merge_window_ms),
            cancel.clone(),
        );

        let gc_task = spawn_gc_ticker(Arc::clone(&engine), cancel.clone());

        Ok(Self {
            engine,
            cancel,
            meta_ops: Mutex::new(HashMap::new()),
            action_ops: Mutex::new(HashMap::new()),
            ips_op: Mutex::new(Some(ips_op)),
            gc_task: Mutex::new(Some(gc_task)),
        })
    }

    /// 기록된 모든 IP를 반환합니다.
    ///
    /// `ips` 키가 아직 없으면 빈 목록이며 에러가 아닙니다.
    pub fn get(&self) -> Result<Vec<String>, StoreError> {
        let Some(bytes) = self.engine.get(IPS_KEY.as_bytes())? else {
            return Ok(Vec::new());
        };
        let set: IpSet = decode(IPS_KEY, &bytes)?;
        Ok(set.into_iter().collect())
    }

    /// IP의 메타데이터를 반환합니다. 없으면 [`StoreError::IpNotFound`]입니다.
    pub fn get_meta(&self, ip: &str) -> Result<Meta, StoreError> {
        let key = meta_key(ip);
        let Some(bytes) = self.engine.get(key.as_bytes())? else {
            return Err(StoreError::IpNotFound(ip.to_owned()));
        };
        decode(&key, &bytes)
    }

    /// IP의 통신 이력을 반환합니다. 없으면 [`StoreError::ActionNotFound`]입니다.
    pub fn get_actions(&self, ip: &str) -> Result<ActionsByIp, StoreError> {
        let key = action_key(ip);
        let Some(bytes) = self.engine.get(key.as_bytes())? else {
            return Err(StoreError::ActionNotFound(ip.to_owned()));
        };
        decode(&key, &bytes)
    }

    /// IP의 메타데이터 델타를 큐에 넣습니다.
    pub fn store_meta(&self, ip: &str, meta: &Meta) -> Result<(), StoreError> {
        let key = meta_key(ip);
        let delta = encode(&key, meta)?;

        let mut ops = self.meta_ops.lock();
        let op = ops.entry(ip.to_owned()).or_insert_with(|| {
            debug!(ip, "spawning meta merge coalescer");
            MergeOperator::spawn(
                Arc::clone(&self.engine),
                key.clone(),
                merge_meta,
                PER_KEY_MERGE_WINDOW,
                self.cancel.clone(),
            )
        });
        op.add(delta)
    }

    /// 통신 한 건을 양방향 간선과 `ips` 갱신으로 풀어 큐에 넣습니다.
    ///
    /// 출발지 레코드에는 `dst` 간선이, 목적지 레코드에는 `src` 간선이
    /// 미러로 들어가고, 두 IP 모두 전체 집합에 더해집니다.
    pub fn store_action(&self, action: &Action) -> Result<(), StoreError> {
        let src = action.src_ip.to_string();
        let dst = action.dst_ip.to_string();

        let src_delta = ActionsByIp::edge(&src, &dst, action.hostname.clone());
        let dst_delta = ActionsByIp::edge(&dst, &src, action.hostname.clone());

        {
            let mut ops = self.action_ops.lock();
            for (ip, delta) in [(&src, src_delta), (&dst, dst_delta)] {
                let key = action_key(ip);
                let bytes = encode(&key, &delta)?;
                let op = ops.entry(ip.clone()).or_insert_with(|| {
                    debug!(ip = %ip, "spawning action merge coalescer");
                    MergeOperator::spawn(
                        Arc::clone(&self.engine),
                        key,
                        merge_actions,
                        PER_KEY_MERGE_WINDOW,
                        self.cancel.clone(),
                    )
                });
                op.add(bytes)?;
            }
        }

        let mut ips = IpSet::new();
        ips.insert(src);
        ips.insert(dst);
        let ips_delta = encode(IPS_KEY, &ips)?;
        match self.ips_op.lock().as_ref() {
            Some(op) => op.add(ips_delta),
            None => Err(StoreError::OperatorStopped(IPS_KEY.to_owned())),
        }
    }

    /// GC 티커를 멈추고, 모든 코얼레서를 플러시하며 정지시킨 뒤,
    /// 로그를 동기화합니다.
    pub async fn dispose(&self) -> Result<(), StoreError> {
        debug!("closing data structure");
        self.cancel.cancel();

        if let Some(task) = self.gc_task.lock().take() {
            let _ = task.await;
        }

        let meta_ops: Vec<MergeOperator> =
            self.meta_ops.lock().drain().map(|(_, op)| op).collect();
        let action_ops: Vec<MergeOperator> =
            self.action_ops.lock().drain().map(|(_, op)| op).collect();
        let ips_op = self.ips_op.lock().take();

        for op in meta_ops {
            op.stop().await;
        }
        for op in action_ops {
            op.stop().await;
        }
        if let Some(op) = ips_op {
            op.stop().await;
        }

        self.engine.flush()?;
        info!(
            keys = self.engine.key_count(),
            bytes = self.engine.size_on_disk(),
            "store closed"
        );
        Ok(())
    }
}

fn spawn_gc_ticker(engine: Arc<LogEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("garbage collection ticker started");
        let mut interval = tokio::time::interval(GC_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 첫 tick은 즉시 발화하므로 소비만 하고 넘어간다
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match engine.run_value_gc(GC_REWRITE_THRESHOLD) {
                        Ok(GcOutcome::Rewritten { reclaimed_bytes }) => {
                            info!(reclaimed_bytes, "value log rewritten");
                        }
                        Ok(GcOutcome::NothingToRewrite) => {
                            debug!("nothing to rewrite");
                        }
                        Err(e) => error!(error = %e, "garbage collection failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("garbage collection ticker stopped");
                    break;
                }
            }
        }
    })
}
