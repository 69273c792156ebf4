//! 도메인 타입 — 파이프라인 전역에서 사용되는 공통 타입
//!
//! 수집기가 만들어내는 [`FlowObservation`], 저장소에 영속되는
//! [`Meta`] / [`ActionsByIp`] / [`IpSet`]을 정의합니다.
//! 영속 타입의 병합 규칙(단조 합집합)은 타입 메서드로 제공하고,
//! 바이트 수준 병합은 저장소 크레이트가 담당합니다.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// 지금까지 기록된 모든 IP의 집합
///
/// 저장소에 단일 키로 영속되며, 실행 중 단조 증가합니다.
pub type IpSet = BTreeSet<String>;

/// 흐름 관측 — 수집기 한 건의 출력
///
/// NetFlow 수집기는 주소 쌍만, SNI 수집기는 포트와 호스트명까지 채웁니다.
/// 필터를 통과한 뒤 저장소가 수락하면 폐기되는 인메모리 전용 값입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowObservation {
    /// 출발지 IP
    pub src_ip: IpAddr,
    /// 목적지 IP
    pub dst_ip: IpAddr,
    /// 출발지 TCP 포트 (SNI 관측에만 존재)
    pub src_port: Option<u16>,
    /// 목적지 TCP 포트 (SNI 관측에만 존재)
    pub dst_port: Option<u16>,
    /// TLS ClientHello에서 추출한 SNI (SNI 관측에만 존재)
    pub hostname: Option<String>,
}

impl FlowObservation {
    /// 주소 쌍만 있는 관측을 생성합니다 (NetFlow 경로).
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port: None,
            dst_port: None,
            hostname: None,
        }
    }

    /// 양 끝점을 반환합니다.
    pub fn endpoints(&self) -> [IpAddr; 2] {
        [self.src_ip, self.dst_ip]
    }
}

impl fmt::Display for FlowObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_ip, self.dst_ip)?;
        if let Some(name) = &self.hostname {
            write!(f, " sni={name}")?;
        }
        Ok(())
    }
}

/// IP 하나에 대해 축적되는 메타데이터
///
/// 첫 조회 결과로 생성되며 이후에는 병합으로만 변경됩니다.
/// 집합 필드는 합집합으로, 스칼라 필드는 새 값이 비어 있지 않을 때만
/// 덮어쓰는 규칙으로 단조 증가합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// 역방향 DNS 및 외부 조회로 알아낸 호스트명들
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub hostnames: BTreeSet<String>,
    /// 회선 사업자
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    /// 도시
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// 국가 코드
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// 소속 기관
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// 외부 조회가 보고한 열린 포트들
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ports: BTreeSet<u16>,
    /// 외부 조회가 보고한 취약점 식별자들
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub vulnerabilities: BTreeSet<String>,
    /// CDN 여부
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_cdn: Option<bool>,
    /// CDN 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn_name: Option<String>,
}

impl Meta {
    /// 호스트명만 채운 메타데이터를 생성합니다 (로컬 주소 경로).
    pub fn with_hostnames<I, S>(hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hostnames: hostnames.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// `other`를 이 값에 병합합니다.
    ///
    /// 집합 필드는 합집합을 취하므로 중복 삽입은 무연산입니다.
    /// 스칼라 필드는 `other`의 값이 비어 있지 않을 때만 교체됩니다.
    pub fn absorb(&mut self, other: Meta) {
        self.hostnames.extend(other.hostnames);
        self.ports.extend(other.ports);
        self.vulnerabilities.extend(other.vulnerabilities);

        absorb_scalar(&mut self.isp, other.isp);
        absorb_scalar(&mut self.city, other.city);
        absorb_scalar(&mut self.country, other.country);
        absorb_scalar(&mut self.organization, other.organization);
        if other.is_cdn.is_some() {
            self.is_cdn = other.is_cdn;
        }
        absorb_scalar(&mut self.cdn_name, other.cdn_name);
    }
}

/// 빈 문자열은 정보가 없는 것으로 취급합니다.
fn absorb_scalar(slot: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming {
        if !value.is_empty() {
            *slot = Some(value);
        }
    }
}

/// IP 하나의 통신 이력 — 상대 IP별로 관측된 SNI 집합
///
/// IP *X*에 대해, X가 통신한 상대들과 각 간선에서 본 호스트명들을 담습니다.
/// 간선은 양방향으로 미러링되어 두 끝점 모두의 레코드에 나타납니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsByIp {
    /// 레코드의 주인 IP
    pub ip: String,
    /// 상대 IP → 그 간선에서 관측된 호스트명 집합
    #[serde(default)]
    pub traffic: BTreeMap<String, BTreeSet<String>>,
}

impl ActionsByIp {
    /// 간선 하나짜리 레코드를 생성합니다.
    ///
    /// 호스트명이 없는 관측(NetFlow)은 빈 집합의 간선으로 기록됩니다.
    pub fn edge(ip: impl Into<String>, peer: impl Into<String>, hostname: Option<String>) -> Self {
        let mut hostnames = BTreeSet::new();
        if let Some(name) = hostname {
            hostnames.insert(name);
        }
        let mut traffic = BTreeMap::new();
        traffic.insert(peer.into(), hostnames);
        Self {
            ip: ip.into(),
            traffic,
        }
    }

    /// `other`의 간선들을 이 레코드에 병합합니다.
    ///
    /// 상대별 호스트명 집합의 합집합을 취하며, 없는 간선은 새로 만듭니다.
    pub fn absorb(&mut self, other: ActionsByIp) {
        for (peer, hostnames) in other.traffic {
            self.traffic.entry(peer).or_default().extend(hostnames);
        }
    }
}

/// 저장소에 전달되는 통신 한 건
///
/// 필터를 통과한 관측에서 만들어지며, 저장소가 양방향 간선과
/// [`IpSet`] 갱신으로 풀어냅니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// 출발지 IP
    pub src_ip: IpAddr,
    /// 목적지 IP
    pub dst_ip: IpAddr,
    /// 간선에 기록할 호스트명 (SNI 관측에만 존재)
    pub hostname: Option<String>,
}

impl From<&FlowObservation> for Action {
    fn from(observation: &FlowObservation) -> Self {
        Self {
            src_ip: observation.src_ip,
            dst_ip: observation.dst_ip,
            hostname: observation.hostname.clone(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(name) => write!(f, "{} -> {} ({name})", self.src_ip, self.dst_ip),
            None => write!(f, "{} -> {}", self.src_ip, self.dst_ip),
        }
    }
}
