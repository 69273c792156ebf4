//! 보강기 — 캐시, 역방향 DNS, CDN 판정, 외부 조회의 합성
//!
//! 관측 하나당 끝점별로 동시에 호출됩니다. 같은 IP를 두 호출자가
//! 동시에 조회하면 원격 조회가 중복될 수 있지만, 저장소 병합이
//! 멱등이라 결과는 같습니다. 캐시는 손실 가능하고 저장소가 권위
//! 상태입니다.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lanaudit_core::config::EnrichConfig;
use lanaudit_core::types::Meta;
use lanaudit_store::Store;

use crate::cache::MetaCache;
use crate::cdn::CdnChecker;
use crate::intel::IntelClient;
use crate::resolver::PtrResolver;

/// 캐시 항목 수 로그 주기
const CACHE_INFO_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// 로컬 주소 판정에 쓰는 PTR 접미사 (원형, 후행 점 포함)
const LOCAL_SUFFIX: &str = ".lan.";

/// IP별 메타데이터 보강기
///
/// 생성 시점에 퍼지 티커와 진단 티커를 띄우고, [`dispose`](Self::dispose)가
/// 둘을 정지시킵니다.
pub struct Enricher<R, C> {
    resolver: R,
    intel: C,
    cdn: CdnChecker,
    cache: Arc<MetaCache>,
    store: Arc<Store>,
    cancel: CancellationToken,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl<R, C> Enricher<R, C>
where
    R: PtrResolver,
    C: IntelClient,
{
    /// 보강기를 만들고 백그라운드 티커들을 띄웁니다.
    pub fn new(config: &EnrichConfig, resolver: R, intel: C, store: Arc<Store>) -> Self {
        let cache = Arc::new(MetaCache::new(config.cache_size));
        let cancel = CancellationToken::new();

        let tickers = vec![
            spawn_purge_ticker(
                Arc::clone(&cache),
                Duration::from_secs(config.cache_eviction_secs),
                cancel.clone(),
            ),
            spawn_info_ticker(Arc::clone(&cache), cancel.clone()),
        ];

        Self {
            resolver,
            intel,
            cdn: CdnChecker::new(),
            cache,
            store,
            cancel,
            tickers: Mutex::new(tickers),
        }
    }

    /// IP 하나를 보강하고 결과를 캐시와 저장소에 남깁니다.
    ///
    /// 역방향 DNS나 외부 조회가 실패해도 중단하지 않습니다 — 알아낸
    /// 필드만으로 축소된 메타데이터를 만듭니다.
    pub async fn enrich(&self, ip: IpAddr) -> Meta {
        let key = ip.to_string();
        if let Some(cached) = self.cache.get(&key) {
            debug!(ip = %key, "cache hit");
            return cached;
        }

        let raw_ptrs = match self.resolver.lookup_ptr(ip).await {
            Ok(names) if !names.is_empty() => names,
            Ok(_) => {
                warn!(ip = %key, "no ptr records");
                Vec::new()
            }
            Err(e) => {
                warn!(ip = %key, error = %e, "reverse lookup failed");
                Vec::new()
            }
        };

        let is_local = raw_ptrs
            .iter()
            .any(|name| name.to_lowercase().ends_with(LOCAL_SUFFIX));
        if is_local {
            let hostnames: Vec<String> = raw_ptrs.iter().map(|name| local_name(name)).collect();
            info!(ip = %key, hostnames = ?hostnames, "local address");
            let meta = Meta::with_hostnames(hostnames);
            self.remember(&key, meta.clone());
            return meta;
        }

        let ptr_names: Vec<String> = raw_ptrs.iter().map(|name| normalize(name)).collect();

        let mut meta = Meta::default();
        if let Some(cdn) = self.cdn.classify_any(ptr_names.iter().map(String::as_str)) {
            debug!(ip = %key, cdn, "cdn suffix matched");
            meta.is_cdn = Some(true);
            meta.cdn_name = Some(cdn.to_owned());
        }

        match self.intel.host_report(ip).await {
            Ok(report) => {
                let hostnames = if report.hostnames.is_empty() {
                    ptr_names
                } else {
                    report.hostnames
                };
                meta.hostnames = hostnames.into_iter().map(|h| h.to_lowercase()).collect();
                meta.isp = nonempty_lowercase(report.isp);
                meta.city = nonempty_lowercase(report.city);
                meta.country = nonempty_lowercase(report.country_code);
                meta.organization = nonempty_lowercase(report.organization);
                meta.ports = report.ports.into_iter().collect();
                meta.vulnerabilities = report.vulnerabilities.into_iter().collect();
            }
            Err(e) => {
                // 외부 조회 실패는 필드 축소로 끝난다
                warn!(ip = %key, error = %e, "host intel degraded");
                meta.hostnames = ptr_names.into_iter().collect();
            }
        }

        self.remember(&key, meta.clone());
        meta
    }

    /// 캐시에 넣고 저장소로 보냅니다. 저장 실패는 경고로만 남깁니다.
    fn remember(&self, ip: &str, meta: Meta) {
        self.cache.insert(ip, meta.clone());
        if let Err(e) = self.store.store_meta(ip, &meta) {
            warn!(ip, error = %e, "store meta failed");
        }
    }

    /// 현재 캐시 항목 수
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// 티커들을 정지시킵니다. 진행 중인 `enrich` 호출은 끝까지 갑니다.
    pub async fn dispose(&self) {
        self.cancel.cancel();
        let tickers: Vec<JoinHandle<()>> = self.tickers.lock().drain(..).collect();
        for ticker in tickers {
            let _ = ticker.await;
        }
        debug!("enricher disposed");
    }
}

/// PTR 원형을 소문자화하고 후행 점을 떼어냅니다.
fn normalize(raw: &str) -> String {
    raw.to_lowercase()
        .trim_end_matches('.')
        .to_owned()
}

/// 로컬 주소의 표시 이름: `.lan.` 접미사를 통째로 떼어냅니다.
fn local_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    match lowered.strip_suffix(LOCAL_SUFFIX) {
        Some(stripped) => stripped.to_owned(),
        None => lowered.trim_end_matches('.').to_owned(),
    }
}

fn nonempty_lowercase(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.to_lowercase())
        .filter(|s| !s.is_empty())
}

fn spawn_purge_ticker(
    cache: Arc<MetaCache>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 첫 tick은 즉시 발화하므로 소비만 한다
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!("cache evictor started");
                    cache.purge();
                    debug!("cache is purged");
                }
                _ = cancel.cancelled() => {
                    debug!("cache purge ticker stopped");
                    break;
                }
            }
        }
    })
}

fn spawn_info_ticker(cache: Arc<MetaCache>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_INFO_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!(cached_entries = cache.len(), "cache info");
                }
                _ = cancel.cancelled() => {
                    debug!("cache info ticker stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intel::testing::RecordingIntelClient;
    use crate::intel::HostIntel;
    use crate::resolver::testing::StaticResolver;
    use lanaudit_core::config::StoreConfig;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> Arc<Store> {
        let config = StoreConfig {
            database_file: dir.path().to_path_buf(),
            application_name: "enrich-test".to_owned(),
            ips_merge_window_ms: 20,
        };
        Arc::new(Store::open(&config).unwrap())
    }

    fn enrich_config(eviction_secs: u64) -> EnrichConfig {
        EnrichConfig {
            dns: "1.1.1.1:53".to_owned(),
            shodan_api_key: "test-key".to_owned(),
            cache_size: 16,
            cache_eviction_secs: eviction_secs,
        }
    }

    #[tokio::test]
    async fn local_address_short_circuits_intel() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let resolver = StaticResolver::new().with_answer("192.168.1.1", &["router.lan."]);
        let intel = RecordingIntelClient::failing();

        let enricher = Enricher::new(&enrich_config(3600), resolver, intel, Arc::clone(&store));

        let meta = enricher.enrich("192.168.1.1".parse().unwrap()).await;
        assert_eq!(
            meta.hostnames.iter().cloned().collect::<Vec<_>>(),
            vec!["router"]
        );
        assert_eq!(enricher.intel.call_count(), 0);

        enricher.dispose().await;
        store.dispose().await.unwrap();

        let stored = store.get_meta("192.168.1.1").unwrap();
        assert!(stored.hostnames.contains("router"));
        assert!(stored.isp.is_none());
    }

    #[tokio::test]
    async fn cache_hit_skips_resolver() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let resolver = StaticResolver::new().with_answer("192.168.1.1", &["router.lan."]);
        let intel = RecordingIntelClient::failing();

        let enricher = Enricher::new(&enrich_config(3600), resolver, intel, Arc::clone(&store));

        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        enricher.enrich(ip).await;
        enricher.enrich(ip).await;
        assert_eq!(enricher.resolver.lookup_count(), 1);

        enricher.dispose().await;
        store.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn failed_intel_degrades_to_ptr_names() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let resolver = StaticResolver::new().with_answer("93.184.216.34", &["Host.Example.COM."]);
        let intel = RecordingIntelClient::failing();

        let enricher = Enricher::new(&enrich_config(3600), resolver, intel, Arc::clone(&store));

        let meta = enricher.enrich("93.184.216.34".parse().unwrap()).await;
        assert!(meta.hostnames.contains("host.example.com"));
        assert!(meta.isp.is_none());
        assert_eq!(enricher.intel.call_count(), 1);

        enricher.dispose().await;
        store.dispose().await.unwrap();
        assert!(store.get_meta("93.184.216.34").is_ok());
    }

    #[tokio::test]
    async fn intel_report_fills_and_lowercases_fields() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let resolver = StaticResolver::new().with_answer("8.8.8.8", &["dns.google."]);
        let intel = RecordingIntelClient::with_report(HostIntel {
            hostnames: vec!["DNS.Google".to_owned()],
            isp: Some("Google LLC".to_owned()),
            city: Some("Mountain View".to_owned()),
            country_code: Some("US".to_owned()),
            organization: Some("Google LLC".to_owned()),
            ports: vec![53, 443],
            vulnerabilities: vec!["CVE-2020-0001".to_owned()],
        });

        let enricher = Enricher::new(&enrich_config(3600), resolver, intel, Arc::clone(&store));

        let meta = enricher.enrich("8.8.8.8".parse().unwrap()).await;
        assert!(meta.hostnames.contains("dns.google"));
        assert_eq!(meta.isp.as_deref(), Some("google llc"));
        assert_eq!(meta.country.as_deref(), Some("us"));
        assert!(meta.ports.contains(&53));
        assert!(meta.vulnerabilities.contains("CVE-2020-0001"));

        enricher.dispose().await;
        store.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn cdn_suffix_marks_meta() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let resolver =
            StaticResolver::new().with_answer("13.32.0.1", &["server-13-32.cloudfront.net."]);
        let intel = RecordingIntelClient::failing();

        let enricher = Enricher::new(&enrich_config(3600), resolver, intel, Arc::clone(&store));

        let meta = enricher.enrich("13.32.0.1".parse().unwrap()).await;
        assert_eq!(meta.is_cdn, Some(true));
        assert_eq!(meta.cdn_name.as_deref(), Some("cloudfront"));

        enricher.dispose().await;
        store.dispose().await.unwrap();
    }

    #[tokio::test]
    async fn dns_failure_still_stores_what_is_known() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let resolver = StaticResolver::new(); // 모든 조회 실패
        let intel = RecordingIntelClient::failing();

        let enricher = Enricher::new(&enrich_config(3600), resolver, intel, Arc::clone(&store));

        let meta = enricher.enrich("203.0.113.9".parse().unwrap()).await;
        assert!(meta.hostnames.is_empty());

        enricher.dispose().await;
        store.dispose().await.unwrap();
        // 아는 것이 없어도 IP 자체는 저장된다
        assert!(store.get_meta("203.0.113.9").is_ok());
    }

    #[tokio::test]
    async fn purge_ticker_empties_cache_and_forces_lookup() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let resolver = StaticResolver::new().with_answer("192.168.1.1", &["router.lan."]);
        let intel = RecordingIntelClient::failing();

        // 1초 주기 퍼지
        let enricher = Enricher::new(&enrich_config(1), resolver, intel, Arc::clone(&store));

        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        enricher.enrich(ip).await;
        assert_eq!(enricher.cached_entries(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(enricher.cached_entries(), 0);

        // 퍼지 후 첫 조회는 캐시 적중이 아니어야 한다
        enricher.enrich(ip).await;
        assert_eq!(enricher.resolver.lookup_count(), 2);

        enricher.dispose().await;
        store.dispose().await.unwrap();
    }

    #[test]
    fn normalize_strips_one_trailing_dot() {
        assert_eq!(normalize("Host.Example.COM."), "host.example.com");
        assert_eq!(normalize("bare"), "bare");
    }

    #[test]
    fn local_name_strips_lan_suffix() {
        assert_eq!(local_name("router.lan."), "router");
        assert_eq!(local_name("NAS.LAN."), "nas");
        assert_eq!(local_name("other.example."), "other.example");
    }
}
