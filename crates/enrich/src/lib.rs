//! lanaudit 보강 파이프라인
//!
//! 필터를 통과한 관측의 끝점 IP마다 역방향 DNS, 로컬(`.lan.`) 판정,
//! CDN 분류, 선택적 외부 호스트 조회를 수행해 [`Meta`]를 만들고
//! 저장소로 보냅니다. 결과는 용량 제한 LRU에 캐시되며 주기적으로
//! 전체 퍼지됩니다.
//!
//! # 모듈 구성
//! - [`enricher`]: 보강 흐름과 백그라운드 티커
//! - [`cache`]: IP별 LRU 캐시
//! - [`resolver`]: 역방향 DNS trait + 고정 서버 구현
//! - [`intel`]: 외부 호스트 조회 trait + Shodan 구현
//! - [`cdn`]: 순수 인프로세스 CDN 분류기
//! - [`error`]: 도메인 에러 타입
//!
//! [`Meta`]: lanaudit_core::types::Meta

pub mod cache;
pub mod cdn;
pub mod enricher;
pub mod error;
pub mod intel;
pub mod resolver;

// --- 주요 타입 re-export ---

pub use cache::MetaCache;
pub use cdn::CdnChecker;
pub use enricher::Enricher;
pub use error::EnrichError;
pub use intel::{HostIntel, IntelClient, ShodanClient};
pub use resolver::{DnsPtrResolver, PtrResolver};
