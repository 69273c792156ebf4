//! 설정 관리 — 데몬 전체의 런타임 설정
//!
//! CLI/환경변수 파싱은 데몬 바이너리가 담당하고, 이 모듈은
//! 파싱이 끝난 값들의 구조와 유효성 검증만 정의합니다.

use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// lanaudit 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanauditConfig {
    /// 일반 설정
    pub general: GeneralConfig,
    /// NetFlow 수집기 설정
    pub netflow: NetflowConfig,
    /// SNI 수집기 설정
    pub sni: SniConfig,
    /// CIDR 필터 설정
    pub filter: FilterConfig,
    /// 보강 파이프라인 설정
    pub enrich: EnrichConfig,
    /// 저장소 설정
    pub store: StoreConfig,
    /// 조회 API 설정
    pub api: ApiConfig,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// 로그 환경 — `production`이면 JSON, 그 외에는 pretty 출력
    pub log_environment: String,
}

/// NetFlow 수집기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetflowConfig {
    /// 수신 주소, `netflow://host:port` 형태
    pub listen_addr: String,
    /// 디코더 워커 수
    pub workers: usize,
}

impl NetflowConfig {
    /// `netflow://host:port`를 바인드 가능한 `host:port`로 풀어냅니다.
    ///
    /// 호스트가 비어 있으면 모든 인터페이스(`0.0.0.0`)에 바인드합니다.
    pub fn listen_endpoint(&self) -> Result<(String, u16), ConfigError> {
        let rest = self
            .listen_addr
            .strip_prefix("netflow://")
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "listen-addr".to_owned(),
                reason: format!("expected netflow://host:port, got '{}'", self.listen_addr),
            })?;

        let (host, port) = rest.rsplit_once(':').ok_or_else(|| ConfigError::InvalidValue {
            field: "listen-addr".to_owned(),
            reason: format!("missing port in '{}'", self.listen_addr),
        })?;

        let port = port.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            field: "listen-addr".to_owned(),
            reason: format!("invalid port in '{}'", self.listen_addr),
        })?;

        let host = if host.is_empty() { "0.0.0.0" } else { host };
        Ok((host.to_owned(), port))
    }
}

/// SNI 수집기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SniConfig {
    /// 캡처 인터페이스 이름
    pub interface: String,
    /// BPF 필터 표현식
    pub bpf_filter: String,
}

/// CIDR 필터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// 감사 대상 CIDR
    pub cidr: IpNet,
    /// CIDR에서 제외할 IP들
    pub exclusions: Vec<IpAddr>,
}

/// 보강 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// 역방향 조회에 사용할 DNS 서버, `host:port`
    pub dns: String,
    /// 외부 호스트 조회 API 키
    pub shodan_api_key: String,
    /// LRU 캐시 용량
    pub cache_size: usize,
    /// 캐시 전체 퍼지 주기 (초)
    pub cache_eviction_secs: u64,
}

/// 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// KV 데이터 디렉토리의 부모 경로
    pub database_file: PathBuf,
    /// DB 하위 경로로 쓰이는 애플리케이션 이름
    pub application_name: String,
    /// `ips` 키 병합기의 플러시 주기 (밀리초)
    pub ips_merge_window_ms: u64,
}

impl StoreConfig {
    /// 실제 데이터 디렉토리 경로: `<database_file>/<application_name>.data`
    pub fn data_dir(&self) -> PathBuf {
        self.database_file
            .join(format!("{}.data", self.application_name))
    }
}

/// 조회 API 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP 포트
    pub port: u16,
}

impl Default for LanauditConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                log_environment: String::new(),
            },
            netflow: NetflowConfig {
                listen_addr: "netflow://0.0.0.0:2055".to_owned(),
                workers: 1,
            },
            sni: SniConfig {
                interface: "eth0".to_owned(),
                bpf_filter: "(dst port 443)".to_owned(),
            },
            filter: FilterConfig {
                cidr: "192.168.1.0/24".parse().expect("default cidr"),
                exclusions: Vec::new(),
            },
            enrich: EnrichConfig {
                dns: "1.1.1.1:53".to_owned(),
                shodan_api_key: String::new(),
                cache_size: 1024,
                cache_eviction_secs: 8 * 60 * 60,
            },
            store: StoreConfig {
                database_file: std::env::temp_dir(),
                application_name: "lanaudit".to_owned(),
                ips_merge_window_ms: 200,
            },
            api: ApiConfig { port: 3000 },
        }
    }
}

impl LanauditConfig {
    /// 설정 전체를 검증합니다.
    ///
    /// 기동을 막아야 하는 문제(키 누락, 잘못된 주소 형태 등)만 에러로
    /// 처리합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enrich.shodan_api_key.is_empty() {
            return Err(ConfigError::Missing {
                field: "shodan-api-key".to_owned(),
            });
        }
        if self.enrich.cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache-size".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.netflow.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.sni.interface.is_empty() {
            return Err(ConfigError::Missing {
                field: "iface".to_owned(),
            });
        }
        self.netflow.listen_endpoint()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> LanauditConfig {
        let mut config = LanauditConfig::default();
        config.enrich.shodan_api_key = "test-key".to_owned();
        config
    }

    #[test]
    fn default_config_rejects_missing_api_key() {
        let err = LanauditConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("shodan-api-key"));
    }

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = valid_config();
        config.netflow.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn listen_endpoint_parses_default() {
        let config = LanauditConfig::default();
        let (host, port) = config.netflow.listen_endpoint().unwrap();
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 2055);
    }

    #[test]
    fn listen_endpoint_defaults_empty_host() {
        let netflow = NetflowConfig {
            listen_addr: "netflow://:2055".to_owned(),
            workers: 1,
        };
        let (host, port) = netflow.listen_endpoint().unwrap();
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 2055);
    }

    #[test]
    fn listen_endpoint_rejects_other_schemes() {
        let netflow = NetflowConfig {
            listen_addr: "sflow://0.0.0.0:6343".to_owned(),
            workers: 1,
        };
        assert!(netflow.listen_endpoint().is_err());
    }

    #[test]
    fn store_data_dir_appends_application_name() {
        let store = StoreConfig {
            database_file: PathBuf::from("/var/lib"),
            application_name: "lanaudit".to_owned(),
            ips_merge_window_ms: 200,
        };
        assert_eq!(store.data_dir(), PathBuf::from("/var/lib/lanaudit.data"));
    }

    #[test]
    fn config_serializes_roundtrip() {
        let config = valid_config();
        let json = serde_json::to_string(&config).unwrap();
        let back: LanauditConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.api.port, 3000);
        assert_eq!(back.filter.cidr, config.filter.cidr);
    }
}
