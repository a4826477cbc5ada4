//! Profile of the person being called

use serde::{Deserialize, Serialize};

/// Static profile of the call target.
///
/// `user_id` identifies the target in the call-record store; an empty id
/// means the target is unknown and finished calls are not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub bio: String,
}

impl UserProfile {
    /// Store key of the call target, if known
    pub fn call_target(&self) -> Option<&str> {
        let id = self.user_id.trim();
        (!id.is_empty()).then_some(id)
    }

    /// Non-empty profile fields as (label, value) pairs
    pub fn fields(&self) -> Vec<(&'static str, &str)> {
        [
            ("Name", self.name.as_str()),
            ("Email", self.email.as_str()),
            ("Phone", self.phone.as_str()),
            ("City", self.city.as_str()),
            ("Bio", self.bio.as_str()),
        ]
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_user_id_is_unknown_target() {
        let mut profile = UserProfile::default();
        assert_eq!(profile.call_target(), None);

        profile.user_id = "   ".to_string();
        assert_eq!(profile.call_target(), None);

        profile.user_id = "user-42".to_string();
        assert_eq!(profile.call_target(), Some("user-42"));
    }

    #[test]
    fn test_fields_skip_blank_values() {
        let profile = UserProfile {
            name: "Dana Reyes".to_string(),
            city: "Lisbon".to_string(),
            ..Default::default()
        };

        assert_eq!(profile.fields(), vec![("Name", "Dana Reyes"), ("City", "Lisbon")]);
    }
}
