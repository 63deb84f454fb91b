use rand::Rng;

/// A browser fingerprint profile offered to `PageSessionPool::acquire`
/// (spec §4.3: "a randomly-chosen fingerprint profile from the
/// domain-preferred set").
#[derive(Clone, Debug, PartialEq)]
pub struct FingerprintProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
}

impl FingerprintProfile {
    pub fn generic_desktop() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .to_string(),
            viewport: (1920, 1080),
            locale: "pt-BR".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
        }
    }
}

/// Picks a fingerprint uniformly at random from the domain-preferred set,
/// falling back to a generic desktop profile when the domain has none on
/// file yet.
pub fn pick(preferred: &[FingerprintProfile]) -> FingerprintProfile {
    if preferred.is_empty() {
        return FingerprintProfile::generic_desktop();
    }
    let idx = rand::thread_rng().gen_range(0..preferred.len());
    preferred[idx].clone()
}
