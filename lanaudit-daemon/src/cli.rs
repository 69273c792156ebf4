//! CLI argument definitions for the lanaudit daemon.
//!
//! Uses `clap` v4 derive macros. Every flag has a parallel environment
//! variable; an explicit flag wins over the environment, which wins over
//! the default.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use ipnet::IpNet;

use lanaudit_core::config::{
    ApiConfig, EnrichConfig, FilterConfig, GeneralConfig, LanauditConfig, NetflowConfig,
    SniConfig, StoreConfig,
};

/// Passive network auditor for a home/small-office LAN.
///
/// Collects NetFlow exports and sniffs TLS ClientHello SNI, enriches
/// every observed LAN endpoint, and serves the results over a small
/// read-only HTTP API.
#[derive(Parser, Debug)]
#[command(name = "lanaudit")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Network CIDR to consider.
    #[arg(long = "network-cidr", env = "NETWORK_CIDR", default_value = "192.168.1.0/24")]
    pub network_cidr: IpNet,

    /// Comma separated IPs to exclude from the network.
    #[arg(long = "ip-exclusion", env = "IP_EXCLUSION", value_delimiter = ',')]
    pub ip_exclusion: Vec<IpAddr>,

    /// Address and port to listen on for NetFlow exports.
    #[arg(
        long = "listen-addr",
        env = "NFLOW_LISTEN_ADDR",
        default_value = "netflow://0.0.0.0:2055"
    )]
    pub listen_addr: String,

    /// Number of NetFlow decoder workers.
    #[arg(long, env = "NFLOW_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Capture interface for the SNI sniffer.
    #[arg(long = "iface", env = "INTERFACE_NAME", default_value = "eth0")]
    pub iface: String,

    /// BPF filter expression for the SNI sniffer.
    #[arg(long = "bpf-filter", env = "BPF_FILTER", default_value = "(dst port 443)")]
    pub bpf_filter: String,

    /// DNS server used for reverse lookups, host:port.
    #[arg(long, env = "DNS", default_value = "1.1.1.1:53")]
    pub dns: String,

    /// Shodan API key (required).
    #[arg(long = "shodan-api-key", env = "SHODAN_API_KEY", default_value = "")]
    pub shodan_api_key: String,

    /// LRU cache capacity for enrichment results.
    #[arg(long = "cache-size", env = "CACHE_SIZE", default_value_t = 1024)]
    pub cache_size: usize,

    /// Cache purge period (e.g. "8h", "30m", "90s").
    #[arg(
        long = "cache-eviction",
        env = "CACHE_EVICTION",
        default_value = "8h",
        value_parser = parse_duration
    )]
    pub cache_eviction: Duration,

    /// Directory holding the embedded database.
    #[arg(long = "database-file", env = "DATABASE_FILE")]
    pub database_file: Option<PathBuf>,

    /// Application name, used as the database sub-path.
    #[arg(long = "application-name", env = "APPLICATION_NAME", default_value = "lanaudit")]
    pub application_name: String,

    /// Log environment: "production" emits JSON lines, anything else pretty.
    #[arg(long = "log-environment", env = "LOG_ENVIRONMENT", default_value = "")]
    pub log_environment: String,

    /// Read API port.
    #[arg(long = "api-port", env = "API_PORT", default_value_t = 3000)]
    pub api_port: u16,
}

impl DaemonCli {
    /// Assemble the runtime configuration.
    pub fn into_config(self) -> LanauditConfig {
        LanauditConfig {
            general: GeneralConfig {
                log_environment: self.log_environment,
            },
            netflow: NetflowConfig {
                listen_addr: self.listen_addr,
                workers: self.workers,
            },
            sni: SniConfig {
                interface: self.iface,
                bpf_filter: self.bpf_filter,
            },
            filter: FilterConfig {
                cidr: self.network_cidr,
                exclusions: self.ip_exclusion,
            },
            enrich: EnrichConfig {
                dns: self.dns,
                shodan_api_key: self.shodan_api_key,
                cache_size: self.cache_size,
                cache_eviction_secs: self.cache_eviction.as_secs(),
            },
            store: StoreConfig {
                database_file: self.database_file.unwrap_or_else(std::env::temp_dir),
                application_name: self.application_name,
                ips_merge_window_ms: 200,
            },
            api: ApiConfig {
                port: self.api_port,
            },
        }
    }
}

/// Parse durations of the form "90s", "30m", "8h" or compounds like "1h30m".
/// A bare number is taken as seconds.
fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_owned());
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let amount: u64 = digits
            .parse()
            .map_err(|_| format!("invalid duration '{value}'"))?;
        digits.clear();
        let unit = match c {
            's' => Duration::from_secs(1),
            'm' => Duration::from_secs(60),
            'h' => Duration::from_secs(3600),
            other => return Err(format!("unknown duration unit '{other}' in '{value}'")),
        };
        total += unit * u32::try_from(amount).map_err(|_| format!("duration '{value}' too large"))?;
    }
    if !digits.is_empty() {
        return Err(format!("missing unit at end of '{value}'"));
    }
    Ok(total)
}
