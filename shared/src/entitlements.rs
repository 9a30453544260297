//! Per-user-type entitlements.

use crate::auth::UserType;

/// What a user type is allowed to do per day.
#[derive(Debug, Clone, Copy)]
pub struct Entitlements {
    /// Maximum user messages over a trailing 24 hour window
    pub max_messages_per_day: i64,
    /// Chat model ids this tier may select
    pub available_chat_model_ids: &'static [&'static str],
}

const GUEST_MODELS: [&str; 2] = ["chat-model", "chat-model-reasoning"];
const REGULAR_MODELS: [&str; 3] = ["chat-model", "chat-model-reasoning", "chat-model-small"];

/// Entitlements for a user type.
pub fn entitlements_for(user_type: UserType) -> Entitlements {
    match user_type {
        UserType::Guest => Entitlements {
            max_messages_per_day: 20,
            available_chat_model_ids: &GUEST_MODELS,
        },
        UserType::Regular => Entitlements {
            max_messages_per_day: 100,
            available_chat_model_ids: &REGULAR_MODELS,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_quota_below_regular() {
        let guest = entitlements_for(UserType::Guest);
        let regular = entitlements_for(UserType::Regular);
        assert!(guest.max_messages_per_day < regular.max_messages_per_day);
    }

    #[test]
    fn test_every_tier_can_use_default_model() {
        for t in [UserType::Guest, UserType::Regular] {
            assert!(entitlements_for(t)
                .available_chat_model_ids
                .contains(&"chat-model"));
        }
    }
}
