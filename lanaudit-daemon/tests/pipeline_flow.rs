//! End-to-end pipeline tests: observation channel -> filter -> store +
//! enrichment, with the network-facing pieces replaced by test doubles.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lanaudit_core::config::{EnrichConfig, StoreConfig};
use lanaudit_core::types::FlowObservation;
use lanaudit_core::FlowFilter;
use lanaudit_daemon::orchestrator::spawn_dispatch_loop;
use lanaudit_enrich::{EnrichError, Enricher, HostIntel, IntelClient, PtrResolver};
use lanaudit_store::Store;

/// Resolver double: answers only for IPs it was seeded with.
#[derive(Default)]
struct FakeResolver {
    answers: Vec<(IpAddr, Vec<String>)>,
}

impl FakeResolver {
    fn with_answer(mut self, ip: &str, names: &[&str]) -> Self {
        self.answers.push((
            ip.parse().unwrap(),
            names.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }
}

impl PtrResolver for FakeResolver {
    async fn lookup_ptr(&self, ip: IpAddr) -> Result<Vec<String>, EnrichError> {
        self.answers
            .iter()
            .find(|(known, _)| *known == ip)
            .map(|(_, names)| names.clone())
            .ok_or_else(|| EnrichError::Dns {
                ip: ip.to_string(),
                reason: "no records".to_owned(),
            })
    }
}

/// Intel double that always fails -- enrichment must degrade, not stop.
struct DownIntel;

impl IntelClient for DownIntel {
    async fn host_report(&self, ip: IpAddr) -> Result<HostIntel, EnrichError> {
        Err(EnrichError::Intel {
            ip: ip.to_string(),
            reason: "unavailable".to_owned(),
        })
    }
}

struct TestPipeline {
    store: Arc<Store>,
    enricher: Arc<Enricher<FakeResolver, DownIntel>>,
    tx: mpsc::Sender<FlowObservation>,
    cancel: CancellationToken,
    dispatcher: tokio::task::JoinHandle<()>,
}

fn build_pipeline(dir: &TempDir, cidr: &str, exclusions: &[&str], resolver: FakeResolver) -> TestPipeline {
    let store_config = StoreConfig {
        database_file: dir.path().to_path_buf(),
        application_name: "daemon-e2e".to_owned(),
        ips_merge_window_ms: 20,
    };
    let store = Arc::new(Store::open(&store_config).unwrap());

    let enrich_config = EnrichConfig {
        dns: "1.1.1.1:53".to_owned(),
        shodan_api_key: "test-key".to_owned(),
        cache_size: 16,
        cache_eviction_secs: 3600,
    };
    let enricher = Arc::new(Enricher::new(
        &enrich_config,
        resolver,
        DownIntel,
        Arc::clone(&store),
    ));

    let filter = FlowFilter::new(
        cidr.parse().unwrap(),
        exclusions.iter().map(|ip| ip.parse().unwrap()),
    );

    let (tx, rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let dispatcher = spawn_dispatch_loop(
        rx,
        filter,
        Arc::clone(&store),
        Arc::clone(&enricher),
        cancel.clone(),
    );

    TestPipeline {
        store,
        enricher,
        tx,
        cancel,
        dispatcher,
    }
}

impl TestPipeline {
    async fn shutdown(self) -> Arc<Store> {
        // Same order as the daemon: sources (tx) first, then dispatcher,
        // then enricher, then store.
        drop(self.tx);
        self.cancel.cancel();
        let _ = self.dispatcher.await;
        self.enricher.dispose().await;
        self.store.dispose().await.unwrap();
        self.store
    }
}

#[tokio::test]
async fn netflow_observation_lands_in_store() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "192.168.1.0/24", &[], FakeResolver::default());

    pipeline
        .tx
        .send(FlowObservation::new(
            "192.168.1.10".parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let store = pipeline.shutdown().await;

    let mut ips = store.get().unwrap();
    ips.sort();
    assert_eq!(ips, vec!["192.168.1.10", "8.8.8.8"]);

    let actions = store.get_actions("192.168.1.10").unwrap();
    assert!(actions.traffic.contains_key("8.8.8.8"));

    // Both endpoints were enriched even though intel was down.
    assert!(store.get_meta("192.168.1.10").is_ok());
    assert!(store.get_meta("8.8.8.8").is_ok());
}

#[tokio::test]
async fn excluded_source_ip_is_dropped_entirely() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(
        &dir,
        "192.168.1.0/24",
        &["192.168.1.10"],
        FakeResolver::default(),
    );

    pipeline
        .tx
        .send(FlowObservation::new(
            "192.168.1.10".parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let store = pipeline.shutdown().await;

    // The store saw zero writes attributable to the observation.
    assert!(store.get().unwrap().is_empty());
    assert!(store.get_actions("192.168.1.10").is_err());
    assert!(store.get_meta("8.8.8.8").is_err());
}

#[tokio::test]
async fn observation_outside_cidr_is_dropped() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "192.168.1.0/24", &[], FakeResolver::default());

    pipeline
        .tx
        .send(FlowObservation::new(
            "10.1.1.1".parse().unwrap(),
            "8.8.8.8".parse().unwrap(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let store = pipeline.shutdown().await;
    assert!(store.get().unwrap().is_empty());
}

#[tokio::test]
async fn sni_observation_records_hostname_edge() {
    let dir = TempDir::new().unwrap();
    let resolver = FakeResolver::default().with_answer("192.168.1.20", &["laptop.lan."]);
    let pipeline = build_pipeline(&dir, "192.168.1.0/24", &[], resolver);

    pipeline
        .tx
        .send(FlowObservation {
            src_ip: "192.168.1.20".parse().unwrap(),
            dst_ip: "93.184.216.34".parse().unwrap(),
            src_port: Some(51000),
            dst_port: Some(443),
            hostname: Some("example.com".to_owned()),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let store = pipeline.shutdown().await;

    let outbound = store.get_actions("192.168.1.20").unwrap();
    assert!(outbound.traffic["93.184.216.34"].contains("example.com"));

    let mirrored = store.get_actions("93.184.216.34").unwrap();
    assert!(mirrored.traffic["192.168.1.20"].contains("example.com"));

    // The local endpoint got its `.lan.` PTR shortened.
    let meta = store.get_meta("192.168.1.20").unwrap();
    assert!(meta.hostnames.contains("laptop"));
}

#[tokio::test]
async fn repeated_observations_do_not_distort_sets() {
    let dir = TempDir::new().unwrap();
    let pipeline = build_pipeline(&dir, "192.168.1.0/24", &[], FakeResolver::default());

    for _ in 0..3 {
        pipeline
            .tx
            .send(FlowObservation {
                src_ip: "192.168.1.20".parse().unwrap(),
                dst_ip: "93.184.216.34".parse().unwrap(),
                src_port: Some(51000),
                dst_port: Some(443),
                hostname: Some("example.com".to_owned()),
            })
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let store = pipeline.shutdown().await;

    let actions = store.get_actions("192.168.1.20").unwrap();
    assert_eq!(actions.traffic.len(), 1);
    assert_eq!(actions.traffic["93.184.216.34"].len(), 1);
    assert_eq!(store.get().unwrap().len(), 2);
}
