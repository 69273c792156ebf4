//! API 서버 — 수명주기 관리
//!
//! 설정된 포트에 바인드하고 graceful shutdown이 걸린 서빙 루프를
//! 백그라운드 태스크로 돌립니다. 신뢰 프록시는 없으며 요청당
//! 취소(클라이언트 연결 끊김)는 런타임이 핸들러 future를 드롭하는
//! 것으로 처리됩니다.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lanaudit_core::config::ApiConfig;
use lanaudit_core::error::{LanauditError, PipelineError};
use lanaudit_core::pipeline::{HealthStatus, Pipeline};
use lanaudit_store::Store;

use crate::routes::router;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Initialized,
    Running,
    Stopped,
}

/// 조회 API 서버
pub struct ApiServer {
    config: ApiConfig,
    store: Arc<Store>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    state: ServerState,
}

impl ApiServer {
    /// 새 서버를 생성합니다. 바인드는 [`Pipeline::start`]에서 합니다.
    pub fn new(config: ApiConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            cancel: CancellationToken::new(),
            task: None,
            state: ServerState::Initialized,
        }
    }
}

impl Pipeline for ApiServer {
    async fn start(&mut self) -> Result<(), LanauditError> {
        if self.state == ServerState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .map_err(|e| {
                PipelineError::InitFailed(format!(
                    "cannot bind api listener on port {}: {e}",
                    self.config.port
                ))
            })?;
        info!(port = self.config.port, "read api listening");

        let app = router(Arc::clone(&self.store));
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            let shutdown = cancel.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "api server exited with error");
            }
        }));

        self.state = ServerState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), LanauditError> {
        if self.state != ServerState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping read api");
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        self.cancel = CancellationToken::new();
        self.state = ServerState::Stopped;
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ServerState::Running => match &self.task {
                Some(task) if task.is_finished() => {
                    HealthStatus::Unhealthy("server task exited".to_owned())
                }
                _ => HealthStatus::Healthy,
            },
            ServerState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ServerState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanaudit_core::config::StoreConfig;
    use tempfile::TempDir;

    fn empty_store(dir: &TempDir) -> Arc<Store> {
        let config = StoreConfig {
            database_file: dir.path().to_path_buf(),
            application_name: "api-server-test".to_owned(),
            ips_merge_window_ms: 20,
        };
        Arc::new(Store::open(&config).unwrap())
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let dir = TempDir::new().unwrap();
        let store = empty_store(&dir);
        // 포트 0: 커널이 빈 포트를 고른다
        let mut server = ApiServer::new(ApiConfig { port: 0 }, Arc::clone(&store));

        assert!(Pipeline::health_check(&server).await.is_unhealthy());
        server.start().await.unwrap();
        assert!(Pipeline::health_check(&server).await.is_healthy());
        assert!(server.start().await.is_err());

        server.stop().await.unwrap();
        assert!(server.stop().await.is_err());

        store.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn server_can_restart() {
        let dir = TempDir::new().unwrap();
        let store = empty_store(&dir);
        let mut server = ApiServer::new(ApiConfig { port: 0 }, Arc::clone(&store));

        server.start().await.unwrap();
        server.stop().await.unwrap();
        server.start().await.unwrap();
        server.stop().await.unwrap();

        store.dispose().await.unwrap();
    }
}
