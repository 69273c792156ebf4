//! 외부 호스트 조회 추상화
//!
//! [`IntelClient`] trait 뒤에 Shodan 호스트 API 구현과 테스트용
//! 구현을 둡니다. 조회 실패는 보강을 중단시키지 않고 필드 축소로
//! 끝납니다.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EnrichError;

/// HTTP 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_BASE_URL: &str = "https://api.shodan.io";

/// 외부 조회가 돌려주는 호스트 정보
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIntel {
    /// 호스트명들
    pub hostnames: Vec<String>,
    /// 회선 사업자
    pub isp: Option<String>,
    /// 도시
    pub city: Option<String>,
    /// 국가 코드
    pub country_code: Option<String>,
    /// 소속 기관
    pub organization: Option<String>,
    /// 열린 포트들
    pub ports: Vec<u16>,
    /// 취약점 식별자들
    pub vulnerabilities: Vec<String>,
}

/// 외부 호스트 조회 trait
pub trait IntelClient: Send + Sync {
    /// IP 하나의 호스트 보고서를 가져옵니다.
    fn host_report(
        &self,
        ip: IpAddr,
    ) -> impl Future<Output = Result<HostIntel, EnrichError>> + Send;
}

/// Shodan 호스트 API 응답 (minify=true 기준으로 필요한 필드만)
#[derive(Debug, Deserialize)]
struct ShodanHost {
    #[serde(default)]
    hostnames: Vec<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    vulns: Vec<String>,
}

/// Shodan 호스트 API 클라이언트
pub struct ShodanClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl ShodanClient {
    /// API 키로 클라이언트를 만듭니다.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// 테스트에서 목 서버를 가리킬 수 있도록 베이스 URL을 받습니다.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

impl IntelClient for ShodanClient {
    async fn host_report(&self, ip: IpAddr) -> Result<HostIntel, EnrichError> {
        let url = format!("{}/shodan/host/{ip}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("minify", "true")])
            .send()
            .await
            .map_err(|e| EnrichError::Intel {
                ip: ip.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(EnrichError::Intel {
                ip: ip.to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        let host: ShodanHost = response.json().await.map_err(|e| EnrichError::Intel {
            ip: ip.to_string(),
            reason: e.to_string(),
        })?;

        Ok(HostIntel {
            hostnames: host.hostnames,
            isp: host.isp,
            city: host.city,
            country_code: host.country_code,
            organization: host.org,
            ports: host.ports,
            vulnerabilities: host.vulns,
        })
    }
}
