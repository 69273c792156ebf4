//! SNI 수집기 — 라이브 캡처 루프
//!
//! BPF 필터가 걸린 캡처 핸들에서 패킷을 읽어 [`extract_observation`]에
//! 넘기고, 성공한 관측만 다운스트림 파이프로 보냅니다. libpcap의
//! next는 블로킹이므로 루프는 blocking 태스크에서 돌고, 읽기 타임아웃
//! 주기마다 취소 토큰을 확인합니다.

use pcap::{Active, Capture};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lanaudit_core::config::SniConfig;
use lanaudit_core::error::{LanauditError, PipelineError};
use lanaudit_core::pipeline::{HealthStatus, Pipeline};
use lanaudit_core::types::FlowObservation;

use crate::error::SniError;
use crate::extract::extract_observation;

/// 캡처 스냅샷 길이
const SNAPLEN: i32 = 65536;
/// 읽기 타임아웃 (ms) — 취소 확인 주기를 겸한다
const READ_TIMEOUT_MS: i32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Initialized,
    Running,
    Stopped,
}

/// TLS ClientHello 스니퍼
pub struct SniSource {
    config: SniConfig,
    tx: mpsc::Sender<FlowObservation>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: SourceState,
}

impl SniSource {
    /// 새 스니퍼를 생성합니다. 캡처는 [`Pipeline::start`]에서 엽니다.
    pub fn new(config: SniConfig, tx: mpsc::Sender<FlowObservation>) -> Self {
        Self {
            config,
            tx,
            cancel: CancellationToken::new(),
            task: None,
            state: SourceState::Initialized,
        }
    }

    fn open_capture(&self) -> Result<Capture<Active>, SniError> {
        let capture = Capture::from_device(self.config.interface.as_str())
            .map_err(|e| SniError::CaptureOpen {
                interface: self.config.interface.clone(),
                reason: e.to_string(),
            })?
            .promisc(true)
            .snaplen(SNAPLEN)
            .timeout(READ_TIMEOUT_MS)
            .open()
            .map_err(|e| SniError::CaptureOpen {
                interface: self.config.interface.clone(),
                reason: e.to_string(),
            })?;

        let mut capture = capture;
        capture
            .filter(&self.config.bpf_filter, true)
            .map_err(|e| SniError::Filter {
                filter: self.config.bpf_filter.clone(),
                reason: e.to_string(),
            })?;
        Ok(capture)
    }
}

impl Pipeline for SniSource {
    async fn start(&mut self) -> Result<(), LanauditError> {
        if self.state == SourceState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let capture = self.open_capture()?;
        info!(
            interface = %self.config.interface,
            filter = %self.config.bpf_filter,
            "sni capture started"
        );

        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        self.task = Some(tokio::task::spawn_blocking(move || {
            capture_loop(capture, tx, cancel);
        }));

        self.state = SourceState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LanauditError> {
        if self.state != SourceState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("closing sni capture");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        self.cancel = CancellationToken::new();
        self.state = SourceState::Stopped;
        debug!("sni capture closed");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            SourceState::Running => match &self.task {
                Some(task) if task.is_finished() => {
                    HealthStatus::Unhealthy("capture loop exited".to_owned())
                }
                _ => HealthStatus::Healthy,
            },
            SourceState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            SourceState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

fn capture_loop(
    mut capture: Capture<Active>,
    tx: mpsc::Sender<FlowObservation>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!("sni capture loop cancelled");
            return;
        }

        let packet = match capture.next_packet() {
            Ok(packet) => packet,
            // 타임아웃은 취소 확인 기회일 뿐이다
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                warn!(error = %e, "capture read failed, sni loop exiting");
                return;
            }
        };

        match extract_observation(packet.data) {
            Ok(observation) => {
                debug!(%observation, "client hello observed");
                if tx.blocking_send(observation).is_err() {
                    warn!("observation channel closed, sni loop exiting");
                    return;
                }
            }
            Err(reason) => debug!(%reason, "packet skipped"),
        }
    }
}
