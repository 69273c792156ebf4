//! 역방향 DNS 조회 추상화
//!
//! [`PtrResolver`] trait 뒤에 실제 리졸버와 테스트용 구현을 둡니다.
//! 프로덕션 구현은 설정된 DNS 서버 하나에 고정되고 쿼리당 10초
//! 타임아웃을 겁니다.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tracing::debug;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::error::EnrichError;

/// 쿼리당 타임아웃
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// 역방향 DNS 조회 trait
///
/// 반환되는 PTR 응답은 **원형 그대로**(소문자화 전, 후행 점 포함)
/// 입니다. 정규화는 보강기가 담당합니다.
pub trait PtrResolver: Send + Sync {
    /// IP의 PTR 레코드들을 조회합니다.
    fn lookup_ptr(
        &self,
        ip: IpAddr,
    ) -> impl Future<Output = Result<Vec<String>, EnrichError>> + Send;
}

/// 설정된 DNS 서버에 고정된 리졸버
#[derive(Debug)]
pub struct DnsPtrResolver {
    resolver: TokioAsyncResolver,
}

impl DnsPtrResolver {
    /// `host:port` 형태의 DNS 서버 주소로 리졸버를 만듭니다.
    pub fn new(dns_server: &str) -> Result<Self, EnrichError> {
        let socket_addr: SocketAddr = dns_server
            .parse()
            .map_err(|_| EnrichError::InvalidDnsServer(dns_server.to_owned()))?;

        let servers =
            NameServerConfigGroup::from_ips_clear(&[socket_addr.ip()], socket_addr.port(), true);
        let config = ResolverConfig::from_parts(None, Vec::new(), servers);

        let mut opts = ResolverOpts::default();
        opts.timeout = LOOKUP_TIMEOUT;

        Ok(Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        })
    }
}

impl PtrResolver for DnsPtrResolver {
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>, EnrichError> {
        let lookup = self
            .resolver
            .reverse_lookup(ip)
            .await
            .map_err(|e| EnrichError::Dns {
                ip: ip.to_string(),
                reason: e.to_string(),
            })?;

        let names: Vec<String> = lookup.iter().map(|name| name.to_string()).collect();
        debug!(%ip, count = names.len(), "ptr lookup answered");
        Ok(names)
    }
}
