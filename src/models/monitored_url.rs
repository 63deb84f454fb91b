use uuid::Uuid;

/// A URL under periodic price monitoring (spec §3: `MonitoredURL`).
///
/// `domain` is computed once at construction time rather than re-derived on
/// every read, so the "domain derivable from url" invariant is a build-time
/// fact rather than a runtime recomputation that could drift.
#[derive(Clone, Debug, PartialEq)]
pub struct MonitoredUrl {
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub priority: u8,
    pub base_interval_minutes: u32,
    pub last_check_ms: Option<u64>,
    pub active: bool,
}

impl MonitoredUrl {
    /// Builds a `MonitoredUrl`, deriving `domain` from `url`.
    ///
    /// Fails if the URL cannot be parsed or has no host (e.g. `data:` URIs).
    pub fn new(
        id: Uuid,
        url: String,
        priority: u8,
        base_interval_minutes: u32,
    ) -> anyhow::Result<Self> {
        let domain = domain_of(&url)?;
        Ok(Self {
            id,
            url,
            domain,
            priority: priority.min(9),
            base_interval_minutes,
            last_check_ms: None,
            active: true,
        })
    }
}

/// Extracts the registrable host from a URL string.
pub fn domain_of(url: &str) -> anyhow::Result<String> {
    let parsed = url::Url::parse(url)?;
    parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| anyhow::anyhow!("url has no host: {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_is_derived_and_lowercased() {
        let u = MonitoredUrl::new(
            Uuid::new_v4(),
            "https://WWW.Example.com/product/1".into(),
            5,
            360,
        )
        .unwrap();
        assert_eq!(u.domain, "www.example.com");
    }

    #[test]
    fn priority_is_clamped_to_spec_range() {
        let u = MonitoredUrl::new(Uuid::new_v4(), "https://example.com".into(), 250, 360).unwrap();
        assert_eq!(u.priority, 9);
    }

    #[test]
    fn rejects_hostless_urls() {
        let err = MonitoredUrl::new(Uuid::new_v4(), "data:text/plain,hello".into(), 0, 60);
        assert!(err.is_err());
    }
}
