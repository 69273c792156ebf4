//! 순수 인프로세스 CDN 분류기
//!
//! 잘 알려진 CDN 호스트명 접미사 표를 내장합니다. 네트워크를 타지
//! 않으므로 보강 경로 어디서든 공짜로 부를 수 있습니다.

/// (호스트명 접미사, CDN 이름)
const CDN_SUFFIXES: &[(&str, &str)] = &[
    (".cloudfront.net", "cloudfront"),
    (".akamaiedge.net", "akamai"),
    (".akamaitechnologies.com", "akamai"),
    (".akamaized.net", "akamai"),
    (".fastly.net", "fastly"),
    (".fastlylb.net", "fastly"),
    (".cdn.cloudflare.net", "cloudflare"),
    (".cloudflare.com", "cloudflare"),
    (".edgecastcdn.net", "edgecast"),
    (".azureedge.net", "azure-cdn"),
    (".cdn77.org", "cdn77"),
    (".b-cdn.net", "bunny"),
    (".llnwd.net", "limelight"),
    (".googleusercontent.com", "google"),
    (".1e100.net", "google"),
];

/// CDN 분류기
#[derive(Debug, Clone, Copy, Default)]
pub struct CdnChecker;

impl CdnChecker {
    /// 새 분류기를 생성합니다.
    pub fn new() -> Self {
        Self
    }

    /// 호스트명 하나를 분류합니다.
    pub fn classify(&self, hostname: &str) -> Option<&'static str> {
        let hostname = hostname.to_lowercase();
        CDN_SUFFIXES
            .iter()
            .find(|(suffix, _)| hostname.ends_with(suffix))
            .map(|(_, name)| *name)
    }

    /// 호스트명 목록에서 첫 번째 CDN 판정을 돌려줍니다.
    pub fn classify_any<'a, I>(&self, hostnames: I) -> Option<&'static str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        hostnames.into_iter().find_map(|name| self.classify(name))
    }
}
