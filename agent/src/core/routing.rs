//! Backend tier selection for oracle requests.

use serde::Serialize;

use crate::core::types::Complexity;

/// Oracle backend tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Mid,
    Local,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Mid => "mid",
            Tier::Local => "local",
        }
    }
}

/// Pick the tier for a request, in priority order:
///
/// 1. `high` complexity goes to the high tier when it has a credential.
/// 2. Local preference or `low` complexity goes to the local tier.
/// 3. Everything else goes to the mid tier.
pub fn select_tier(complexity: Complexity, prefer_local: bool, high_tier_available: bool) -> Tier {
    if complexity == Complexity::High && high_tier_available {
        return Tier::High;
    }
    if prefer_local || complexity == Complexity::Low {
        return Tier::Local;
    }
    Tier::Mid
}

/// Tier to try after `failed` errors. `None` means the chain is exhausted.
pub fn fallback_tier(failed: Tier) -> Option<Tier> {
    match failed {
        Tier::High | Tier::Local => Some(Tier::Mid),
        Tier::Mid => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_complexity_uses_high_tier_only_with_credential() {
        assert_eq!(select_tier(Complexity::High, false, true), Tier::High);
        assert_eq!(select_tier(Complexity::High, false, false), Tier::Mid);
        // Credential wins over local preference for high complexity.
        assert_eq!(select_tier(Complexity::High, true, true), Tier::High);
        assert_eq!(select_tier(Complexity::High, true, false), Tier::Local);
    }

    #[test]
    fn low_complexity_or_local_preference_uses_local_tier() {
        assert_eq!(select_tier(Complexity::Low, false, true), Tier::Local);
        assert_eq!(select_tier(Complexity::Medium, true, true), Tier::Local);
    }

    #[test]
    fn medium_complexity_defaults_to_mid_tier() {
        assert_eq!(select_tier(Complexity::Medium, false, true), Tier::Mid);
    }

    #[test]
    fn fallback_chain_ends_at_mid_tier() {
        assert_eq!(fallback_tier(Tier::High), Some(Tier::Mid));
        assert_eq!(fallback_tier(Tier::Local), Some(Tier::Mid));
        assert_eq!(fallback_tier(Tier::Mid), None);
    }
}
