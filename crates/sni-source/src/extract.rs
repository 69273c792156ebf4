//! 패킷 한 장을 관측으로 바꾸는 분류기
//!
//! 이더넷 프레임을 슬라이스하여 IPv4/TCP만 통과시키고, 제어 평면
//! 패킷(SYN/FIN/RST/빈 ACK)을 걸러낸 뒤 남은 데이터 패킷에서
//! ClientHello 파싱을 시도합니다.

use std::fmt;
use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use lanaudit_core::types::FlowObservation;

use crate::clienthello::parse_client_hello_sni;

/// 패킷을 건너뛴 이유 — debug 로그용이며 에러가 아닙니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 이더넷/IP 슬라이스 실패
    NotSliceable,
    /// IPv4 레이어 없음
    NotIpv4,
    /// TCP 레이어 없음
    NotTcp,
    /// SYN/FIN/RST 제어 패킷
    ControlPacket,
    /// 페이로드 없는 ACK
    EmptyPayload,
    /// ClientHello 파싱 실패
    NotClientHello,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSliceable => write!(f, "undecodable frame"),
            Self::NotIpv4 => write!(f, "no ipv4 layer"),
            Self::NotTcp => write!(f, "no tcp layer"),
            Self::ControlPacket => write!(f, "control packet"),
            Self::EmptyPayload => write!(f, "empty payload"),
            Self::NotClientHello => write!(f, "not a client hello"),
        }
    }
}

/// 이더넷 프레임에서 SNI 관측을 추출합니다.
pub fn extract_observation(frame: &[u8]) -> Result<FlowObservation, SkipReason> {
    let sliced = SlicedPacket::from_ethernet(frame).map_err(|_| SkipReason::NotSliceable)?;

    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (header.source_addr(), header.destination_addr())
        }
        _ => return Err(SkipReason::NotIpv4),
    };

    let tcp = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return Err(SkipReason::NotTcp),
    };

    if tcp.syn() || tcp.fin() || tcp.rst() {
        return Err(SkipReason::ControlPacket);
    }
    let payload = tcp.payload();
    if payload.is_empty() {
        return Err(SkipReason::EmptyPayload);
    }

    let hostname = parse_client_hello_sni(payload).ok_or(SkipReason::NotClientHello)?;

    Ok(FlowObservation {
        src_ip: IpAddr::V4(src_ip),
        dst_ip: IpAddr::V4(dst_ip),
        src_port: Some(tcp.source_port()),
        dst_port: Some(tcp.destination_port()),
        hostname: Some(hostname),
    })
}
