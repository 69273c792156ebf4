//! NetFlow 수집기 — UDP 수신 루프와 워커 관리
//!
//! 설정된 수만큼의 디코더 워커가 한 소켓을 공유하며 데이터그램을
//! 받아 디코딩하고, 주소 쌍마다 [`FlowObservation`]을 다운스트림
//! 파이프로 보냅니다. 파이프는 용량 1이라 보강이 느려지면 워커가
//! send에서 막히고, 커널 UDP 소켓이 패킷을 떨어뜨립니다 — 의도된
//! 부하 차단 정책입니다.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lanaudit_core::config::NetflowConfig;
use lanaudit_core::error::{LanauditError, PipelineError};
use lanaudit_core::pipeline::{HealthStatus, Pipeline};
use lanaudit_core::types::FlowObservation;

use crate::decode::TemplateRegistry;
use crate::error::NetflowError;

/// 수신 버퍼 크기 — UDP 데이터그램 최대치
const RECV_BUFFER_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Initialized,
    Running,
    Stopped,
}

/// NetFlow UDP 수집기
pub struct NetflowSource {
    config: NetflowConfig,
    tx: mpsc::Sender<FlowObservation>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    state: SourceState,
}

impl NetflowSource {
    /// 새 수집기를 생성합니다. 소켓은 [`Pipeline::start`]에서 바인드합니다.
    pub fn new(config: NetflowConfig, tx: mpsc::Sender<FlowObservation>) -> Self {
        Self {
            config,
            tx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            state: SourceState::Initialized,
        }
    }
}

impl Pipeline for NetflowSource {
    async fn start(&mut self) -> Result<(), LanauditError> {
        if self.state == SourceState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let (host, port) = self.config.listen_endpoint()?;
        let socket = UdpSocket::bind((host.as_str(), port))
            .await
            .map_err(|e| NetflowError::Bind {
                addr: format!("{host}:{port}"),
                reason: e.to_string(),
            })?;
        let socket = Arc::new(socket);
        let registry = Arc::new(Mutex::new(TemplateRegistry::new()));

        info!(
            %host,
            port,
            workers = self.config.workers,
            "netflow listener started"
        );

        for worker in 0..self.config.workers {
            self.tasks.push(tokio::spawn(worker_loop(
                worker,
                Arc::clone(&socket),
                Arc::clone(&registry),
                self.tx.clone(),
                self.cancel.clone(),
            )));
        }

        self.state = SourceState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LanauditError> {
        if self.state != SourceState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping netflow listener");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }

        // 재시작을 지원하기 위해 취소 토큰을 새로 만든다
        self.cancel = CancellationToken::new();
        self.state = SourceState::Stopped;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            SourceState::Running => HealthStatus::Healthy,
            SourceState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            SourceState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

async fn worker_loop(
    worker: usize,
    socket: Arc<UdpSocket>,
    registry: Arc<Mutex<TemplateRegistry>>,
    tx: mpsc::Sender<FlowObservation>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    debug!(worker, "netflow worker started");

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(worker, error = %e, "udp receive failed");
                        continue;
                    }
                };

                let decoded = registry.lock().decode_datagram(peer.ip(), &buf[..len]);
                let pairs = match decoded {
                    Ok(pairs) => pairs,
                    Err(e) => {
                        // 깨진 데이터그램은 버리고 계속 간다
                        debug!(worker, %peer, error = %e, "dropping undecodable datagram");
                        continue;
                    }
                };

                for (src, dst) in pairs {
                    let observation =
                        FlowObservation::new(IpAddr::V4(src), IpAddr::V4(dst));
                    // 다운스트림이 막히면 여기서 블록된다 — 역압 의도대로
                    if tx.send(observation).await.is_err() {
                        warn!(worker, "observation channel closed, worker exiting");
                        return;
                    }
                }
            }
            _ = cancel.cancelled() => {
                debug!(worker, "netflow worker stopped");
                return;
            }
        }
    }
}
