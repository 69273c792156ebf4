//! 키별 병합 함수
//!
//! 병합기는 (현재 값, 대기 중인 델타) 바이트 쌍을 받아 병합된 바이트를
//! 돌려줍니다. 어느 쪽이든 디코딩에 실패하면 **원본 바이트를 그대로**
//! 돌려줍니다 — 찢어진 쓰기나 버전 불일치가 저장된 값을 망가뜨리지
//! 않게 하는 규칙이며, 적용되지 못한 갱신은 로그로만 드러납니다.

use lanaudit_core::types::{ActionsByIp, IpSet, Meta};
use tracing::warn;

use crate::codec::{decode, encode};

/// 병합 함수 시그니처: `(원본, 델타) -> 병합 결과`
pub(crate) type MergeFn = fn(&str, &[u8], &[u8]) -> Vec<u8>;

/// `<ip>-meta` 병합: 집합 필드 합집합, 스칼라는 비어 있지 않은 새 값 우선
pub(crate) fn merge_meta(key: &str, original: &[u8], delta: &[u8]) -> Vec<u8> {
    let (Ok(mut current), Ok(incoming)) = (
        decode::<Meta>(key, original),
        decode::<Meta>(key, delta),
    ) else {
        warn!(key, "undecodable meta merge input, keeping original value");
        return original.to_vec();
    };

    current.absorb(incoming);
    match encode(key, &current) {
        Ok(bytes) => bytes,
        Err(_) => original.to_vec(),
    }
}

/// `<ip>-action` 병합: 상대별 호스트명 집합 합집합
pub(crate) fn merge_actions(key: &str, original: &[u8], delta: &[u8]) -> Vec<u8> {
    let (Ok(mut current), Ok(incoming)) = (
        decode::<ActionsByIp>(key, original),
        decode::<ActionsByIp>(key, delta),
    ) else {
        warn!(key, "undecodable actions merge input, keeping original value");
        return original.to_vec();
    };

    current.absorb(incoming);
    match encode(key, &current) {
        Ok(bytes) => bytes,
        Err(_) => original.to_vec(),
    }
}

/// `ips` 병합: 집합 합집합
pub(crate) fn merge_ips(key: &str, original: &[u8], delta: &[u8]) -> Vec<u8> {
    let (Ok(mut current), Ok(incoming)) = (
        decode::<IpSet>(key, original),
        decode::<IpSet>(key, delta),
    ) else {
        warn!(key, "undecodable ip set merge input, keeping original value");
        return original.to_vec();
    };

    current.extend(incoming);
    match encode(key, &current) {
        Ok(bytes) => bytes,
        Err(_) => original.to_vec(),
    }
}
