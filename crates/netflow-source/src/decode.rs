//! NetFlow v5 / v9 / IPFIX 데이터그램 디코더
//!
//! 파이프라인이 필요로 하는 것은 IPv4 출발지/목적지 주소 쌍뿐이므로,
//! 레코드의 나머지 필드는 길이 계산에만 사용하고 버립니다.
//! v9/IPFIX는 exporter가 먼저 보내주는 템플릿에 의존합니다 —
//! 템플릿이 아직 없는 데이터 플로셋은 조용히 건너뜁니다.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use tracing::debug;

use crate::error::DecodeError;

const V5_HEADER_LEN: usize = 24;
const V5_RECORD_LEN: usize = 48;
const V9_HEADER_LEN: usize = 20;
const IPFIX_HEADER_LEN: usize = 16;

/// IPv4 출발지 주소 필드 (RFC 3954 / IANA IPFIX element 8)
const FIELD_IPV4_SRC_ADDR: u16 = 8;
/// IPv4 목적지 주소 필드 (RFC 3954 / IANA IPFIX element 12)
const FIELD_IPV4_DST_ADDR: u16 = 12;

/// IPFIX 가변 길이 필드 표식 — 지원하지 않음
const VARIABLE_LENGTH: u16 = 0xffff;

/// 디코딩된 주소 쌍 (src, dst)
pub type AddressPair = (Ipv4Addr, Ipv4Addr);

#[derive(Debug, Clone)]
struct Template {
    record_len: usize,
    src_offset: Option<usize>,
    dst_offset: Option<usize>,
}

/// exporter별 템플릿 레지스트리
///
/// (exporter 주소, source id/observation domain, template id)로
/// 키를 잡습니다. 같은 exporter가 템플릿을 다시 보내면 교체됩니다.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<(IpAddr, u32, u16), Template>,
}

impl TemplateRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 등록된 템플릿 수
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// 레지스트리가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// 데이터그램 하나를 디코딩하여 주소 쌍들을 돌려줍니다.
    ///
    /// v9/IPFIX 템플릿 플로셋은 레지스트리에 흡수되고 주소 쌍을
    /// 만들지 않습니다.
    pub fn decode_datagram(
        &mut self,
        exporter: IpAddr,
        data: &[u8],
    ) -> Result<Vec<AddressPair>, DecodeError> {
        if data.len() < 2 {
            return Err(DecodeError::TooShort {
                got: data.len(),
                need: 2,
            });
        }

        match read_u16(data, 0) {
            5 => decode_v5(data),
            9 => self.decode_v9(exporter, data),
            10 => self.decode_ipfix(exporter, data),
            other => Err(DecodeError::UnsupportedVersion(other)),
        }
    }

    fn decode_v9(
        &mut self,
        exporter: IpAddr,
        data: &[u8],
    ) -> Result<Vec<AddressPair>, DecodeError> {
        if data.len() < V9_HEADER_LEN {
            return Err(DecodeError::TooShort {
                got: data.len(),
                need: V9_HEADER_LEN,
            });
        }
        let source_id = read_u32(data, 16);

        let mut pairs = Vec::new();
        let mut offset = V9_HEADER_LEN;
        while offset + 4 <= data.len() {
            let flowset_id = read_u16(data, offset);
            let flowset_len = read_u16(data, offset + 2) as usize;
            if flowset_len < 4 {
                return Err(DecodeError::Malformed("flowset length below minimum"));
            }
            if offset + flowset_len > data.len() {
                return Err(DecodeError::Malformed("flowset overruns datagram"));
            }

            let body = &data[offset + 4..offset + flowset_len];
            match flowset_id {
                0 => self.register_templates(exporter, source_id, body, false)?,
                // 옵션 템플릿과 예약 영역은 관심 대상이 아니다
                1..=255 => {}
                template_id => {
                    self.decode_data_records(exporter, source_id, template_id, body, &mut pairs);
                }
            }
            offset += flowset_len;
        }

        Ok(pairs)
    }

    fn decode_ipfix(
        &mut self,
        exporter: IpAddr,
        data: &[u8],
    ) -> Result<Vec<AddressPair>, DecodeError> {
        if data.len() < IPFIX_HEADER_LEN {
            return Err(DecodeError::TooShort {
                got: data.len(),
                need: IPFIX_HEADER_LEN,
            });
        }
        let message_len = read_u16(data, 2) as usize;
        if message_len > data.len() {
            return Err(DecodeError::Malformed("message length overruns datagram"));
        }
        let domain = read_u32(data, 12);
        let data = &data[..message_len];

        let mut pairs = Vec::new();
        let mut offset = IPFIX_HEADER_LEN;
        while offset + 4 <= data.len() {
            let set_id = read_u16(data, offset);
            let set_len = read_u16(data, offset + 2) as usize;
            if set_len < 4 {
                return Err(DecodeError::Malformed("set length below minimum"));
            }
            if offset + set_len > data.len() {
                return Err(DecodeError::Malformed("set overruns message"));
            }

            let body = &data[offset + 4..offset + set_len];
            match set_id {
                2 => self.register_templates(exporter, domain, body, true)?,
                // 옵션 템플릿(3)과 예약 영역은 건너뛴다
                0..=255 => {}
                template_id => {
                    self.decode_data_records(exporter, domain, template_id, body, &mut pairs);
                }
            }
            offset += set_len;
        }

        Ok(pairs)
    }

    /// 템플릿 플로셋 하나를 흡수합니다.
    ///
    /// IPFIX는 enterprise 비트가 켜진 필드 뒤에 4바이트 enterprise
    /// 번호가 따라옵니다. 가변 길이 필드가 섞인 템플릿은 레코드 길이를
    /// 계산할 수 없으므로 등록하지 않습니다.
    fn register_templates(
        &mut self,
        exporter: IpAddr,
        domain: u32,
        body: &[u8],
        enterprise_aware: bool,
    ) -> Result<(), DecodeError> {
        let mut pos = 0;
        while pos + 4 <= body.len() {
            let template_id = read_u16(body, pos);
            let field_count = read_u16(body, pos + 2) as usize;
            pos += 4;

            let mut record_len = 0usize;
            let mut src_offset = None;
            let mut dst_offset = None;
            let mut variable = false;

            for _ in 0..field_count {
                if pos + 4 > body.len() {
                    return Err(DecodeError::Malformed("truncated template field"));
                }
                let field_type = read_u16(body, pos);
                let field_len = read_u16(body, pos + 2);
                pos += 4;

                if enterprise_aware && field_type & 0x8000 != 0 {
                    if pos + 4 > body.len() {
                        return Err(DecodeError::Malformed("truncated enterprise number"));
                    }
                    pos += 4;
                } else if field_len == 4 {
                    match field_type {
                        FIELD_IPV4_SRC_ADDR => src_offset = Some(record_len),
                        FIELD_IPV4_DST_ADDR => dst_offset = Some(record_len),
                        _ => {}
                    }
                }

                if field_len == VARIABLE_LENGTH {
                    variable = true;
                } else {
                    record_len += field_len as usize;
                }
            }

            if variable || record_len == 0 {
                debug!(template_id, "skipping template with unsupported layout");
                continue;
            }

            self.templates.insert(
                (exporter, domain, template_id),
                Template {
                    record_len,
                    src_offset,
                    dst_offset,
                },
            );
            debug!(%exporter, domain, template_id, record_len, "template registered");
        }
        Ok(())
    }

    /// 데이터 플로셋에서 주소 쌍을 꺼냅니다.
    ///
    /// 템플릿이 아직 도착하지 않았으면 조용히 건너뜁니다 — exporter는
    /// 템플릿을 주기적으로 재전송합니다.
    fn decode_data_records(
        &self,
        exporter: IpAddr,
        domain: u32,
        template_id: u16,
        body: &[u8],
        pairs: &mut Vec<AddressPair>,
    ) {
        let Some(template) = self.templates.get(&(exporter, domain, template_id)) else {
            debug!(%exporter, domain, template_id, "data flowset before template, skipping");
            return;
        };
        let (Some(src_offset), Some(dst_offset)) = (template.src_offset, template.dst_offset)
        else {
            return;
        };

        let mut pos = 0;
        // 플로셋 끝의 4바이트 미만 패딩은 자연스럽게 무시된다
        while pos + template.record_len <= body.len() {
            let record = &body[pos..pos + template.record_len];
            pairs.push((read_ipv4(record, src_offset), read_ipv4(record, dst_offset)));
            pos += template.record_len;
        }
    }
}

fn decode_v5(data: &[u8]) -> Result<Vec<AddressPair>, DecodeError> {
    if data.len() < V5_HEADER_LEN {
        return Err(DecodeError::TooShort {
            got: data.len(),
            need: V5_HEADER_LEN,
        });
    }
    let count = read_u16(data, 2) as usize;
    let need = V5_HEADER_LEN + count * V5_RECORD_LEN;
    if data.len() < need {
        return Err(DecodeError::Malformed("record count overruns datagram"));
    }

    let mut pairs = Vec::with_capacity(count);
    for i in 0..count {
        let record = &data[V5_HEADER_LEN + i * V5_RECORD_LEN..];
        pairs.push((read_ipv4(record, 0), read_ipv4(record, 4)));
    }
    Ok(pairs)
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_ipv4(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exporter() -> IpAddr {
        "10.0.0.254".parse().unwrap()
    }

    /// 레코드 count개짜리 v5 데이터그램을 만든다.
    fn v5_datagram(flows: &[(Ipv4Addr, Ipv4Addr)]) -> Vec<u8> {
        let mut data = vec![0u8; V5_HEADER_LEN + flows.len() * V5_RECORD_LEN];
        data[0..2].copy_from_slice(&5u16.to_be_bytes());
        data[2..4].copy_from_slice(&(flows.len() as u16).to_be_bytes());
        for (i, (src, dst)) in flows.iter().enumerate() {
            let base = V5_HEADER_LEN + i * V5_RECORD_LEN;
            data[base..base + 4].copy_from_slice(&src.octets());
            data[base + 4..base + 8].copy_from_slice(&dst.octets());
        }
        data
    }

    /// src/dst만 담는 단순 v9 템플릿 플로셋 + 데이터 플로셋을 만든다.
    fn v9_template_datagram(template_id: u16) -> Vec<u8> {
        let mut data = vec![0u8; V9_HEADER_LEN];
        data[0..2].copy_from_slice(&9u16.to_be_bytes());

        // 템플릿 플로셋: id=0, len=4 + 4 + 2*4
        let mut flowset = Vec::new();
        flowset.extend_from_slice(&0u16.to_be_bytes());
        flowset.extend_from_slice(&16u16.to_be_bytes());
        flowset.extend_from_slice(&template_id.to_be_bytes());
        flowset.extend_from_slice(&2u16.to_be_bytes());
        flowset.extend_from_slice(&FIELD_IPV4_SRC_ADDR.to_be_bytes());
        flowset.extend_from_slice(&4u16.to_be_bytes());
        flowset.extend_from_slice(&FIELD_IPV4_DST_ADDR.to_be_bytes());
        flowset.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&flowset);
        data
    }

    fn v9_data_datagram(template_id: u16, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        let mut data = vec![0u8; V9_HEADER_LEN];
        data[0..2].copy_from_slice(&9u16.to_be_bytes());

        let mut flowset = Vec::new();
        flowset.extend_from_slice(&template_id.to_be_bytes());
        flowset.extend_from_slice(&12u16.to_be_bytes());
        flowset.extend_from_slice(&src.octets());
        flowset.extend_from_slice(&dst.octets());
        data.extend_from_slice(&flowset);
        data
    }

    #[test]
    fn v5_single_record() {
        let src = "192.168.1.10".parse().unwrap();
        let dst = "8.8.8.8".parse().unwrap();
        let mut registry = TemplateRegistry::new();

        let pairs = registry
            .decode_datagram(exporter(), &v5_datagram(&[(src, dst)]))
            .unwrap();
        assert_eq!(pairs, vec![(src, dst)]);
    }

    #[test]
    fn v5_multiple_records() {
        let flows = [
            ("192.168.1.10".parse().unwrap(), "8.8.8.8".parse().unwrap()),
            ("192.168.1.11".parse().unwrap(), "1.1.1.1".parse().unwrap()),
        ];
        let mut registry = TemplateRegistry::new();
        let pairs = registry
            .decode_datagram(exporter(), &v5_datagram(&flows))
            .unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].1, "1.1.1.1".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn v5_truncated_records_are_malformed() {
        let src = "192.168.1.10".parse().unwrap();
        let dst = "8.8.8.8".parse().unwrap();
        let mut data = v5_datagram(&[(src, dst)]);
        data.truncate(V5_HEADER_LEN + 10);

        let mut registry = TemplateRegistry::new();
        let err = registry.decode_datagram(exporter(), &data).unwrap_err();
        assert_eq!(err, DecodeError::Malformed("record count overruns datagram"));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut data = vec![0u8; 24];
        data[0..2].copy_from_slice(&7u16.to_be_bytes());

        let mut registry = TemplateRegistry::new();
        assert_eq!(
            registry.decode_datagram(exporter(), &data).unwrap_err(),
            DecodeError::UnsupportedVersion(7)
        );
    }

    #[test]
    fn tiny_datagram_is_too_short() {
        let mut registry = TemplateRegistry::new();
        assert!(matches!(
            registry.decode_datagram(exporter(), &[5]).unwrap_err(),
            DecodeError::TooShort { .. }
        ));
    }

    #[test]
    fn v9_template_then_data() {
        let src: Ipv4Addr = "192.168.1.10".parse().unwrap();
        let dst: Ipv4Addr = "93.184.216.34".parse().unwrap();
        let mut registry = TemplateRegistry::new();

        let none = registry
            .decode_datagram(exporter(), &v9_template_datagram(256))
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(registry.len(), 1);

        let pairs = registry
            .decode_datagram(exporter(), &v9_data_datagram(256, src, dst))
            .unwrap();
        assert_eq!(pairs, vec![(src, dst)]);
    }

    #[test]
    fn v9_data_before_template_is_skipped() {
        let src: Ipv4Addr = "192.168.1.10".parse().unwrap();
        let dst: Ipv4Addr = "93.184.216.34".parse().unwrap();
        let mut registry = TemplateRegistry::new();

        let pairs = registry
            .decode_datagram(exporter(), &v9_data_datagram(256, src, dst))
            .unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn v9_templates_are_scoped_per_exporter() {
        let src: Ipv4Addr = "192.168.1.10".parse().unwrap();
        let dst: Ipv4Addr = "93.184.216.34".parse().unwrap();
        let other_exporter: IpAddr = "10.0.0.253".parse().unwrap();
        let mut registry = TemplateRegistry::new();

        registry
            .decode_datagram(exporter(), &v9_template_datagram(256))
            .unwrap();
        // 다른 exporter의 데이터는 이 템플릿을 쓰지 못한다
        let pairs = registry
            .decode_datagram(other_exporter, &v9_data_datagram(256, src, dst))
            .unwrap();
        assert!(pairs.is_empty());
    }

    #[test]
    fn ipfix_template_then_data() {
        let src: Ipv4Addr = "192.168.1.20".parse().unwrap();
        let dst: Ipv4Addr = "1.0.0.1".parse().unwrap();
        let mut registry = TemplateRegistry::new();

        // 템플릿 세트: set_id=2
        let mut message = vec![0u8; IPFIX_HEADER_LEN];
        message[0..2].copy_from_slice(&10u16.to_be_bytes());
        let mut set = Vec::new();
        set.extend_from_slice(&2u16.to_be_bytes());
        set.extend_from_slice(&16u16.to_be_bytes());
        set.extend_from_slice(&300u16.to_be_bytes());
        set.extend_from_slice(&2u16.to_be_bytes());
        set.extend_from_slice(&FIELD_IPV4_SRC_ADDR.to_be_bytes());
        set.extend_from_slice(&4u16.to_be_bytes());
        set.extend_from_slice(&FIELD_IPV4_DST_ADDR.to_be_bytes());
        set.extend_from_slice(&4u16.to_be_bytes());
        message.extend_from_slice(&set);
        let total = message.len() as u16;
        message[2..4].copy_from_slice(&total.to_be_bytes());

        registry.decode_datagram(exporter(), &message).unwrap();
        assert_eq!(registry.len(), 1);

        // 데이터 세트: set_id=300
        let mut message = vec![0u8; IPFIX_HEADER_LEN];
        message[0..2].copy_from_slice(&10u16.to_be_bytes());
        let mut set = Vec::new();
        set.extend_from_slice(&300u16.to_be_bytes());
        set.extend_from_slice(&12u16.to_be_bytes());
        set.extend_from_slice(&src.octets());
        set.extend_from_slice(&dst.octets());
        message.extend_from_slice(&set);
        let total = message.len() as u16;
        message[2..4].copy_from_slice(&total.to_be_bytes());

        let pairs = registry.decode_datagram(exporter(), &message).unwrap();
        assert_eq!(pairs, vec![(src, dst)]);
    }

    #[test]
    fn v9_flowset_overrun_is_malformed() {
        let mut data = vec![0u8; V9_HEADER_LEN];
        data[0..2].copy_from_slice(&9u16.to_be_bytes());
        // 길이가 데이터그램보다 큰 플로셋 헤더
        data.extend_from_slice(&0u16.to_be_bytes());
        data.extend_from_slice(&200u16.to_be_bytes());

        let mut registry = TemplateRegistry::new();
        assert!(matches!(
            registry.decode_datagram(exporter(), &data).unwrap_err(),
            DecodeError::Malformed(_)
        ));
    }
}
