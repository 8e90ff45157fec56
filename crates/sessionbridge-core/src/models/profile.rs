use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// A signed-in user as reported by an identity provider.
///
/// Field names follow the OpenID Connect userinfo response so that a
/// userinfo body deserializes directly into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    #[serde(rename = "sub")]
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(rename = "name", default)]
    pub display_name: Option<String>,
    #[serde(rename = "picture", default)]
    pub photo_url: Option<String>,
}

impl ProviderUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            email_verified: false,
            display_name: None,
            photo_url: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

/// The user profile exposed to consumers. Replaced wholesale on every update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Name to show in a UI: display name, then email, then the raw id.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.email.as_deref())
            .unwrap_or(self.id.as_str())
    }
}

impl From<&ProviderUser> for UserProfile {
    fn from(user: &ProviderUser) -> Self {
        Self {
            id: user.uid.clone(),
            email: user.email.clone(),
            email_verified: user.email_verified,
            display_name: user.display_name.clone(),
            avatar_url: user.photo_url.clone(),
        }
    }
}

impl From<ProviderUser> for UserProfile {
    fn from(user: ProviderUser) -> Self {
        Self {
            id: user.uid,
            email: user.email,
            email_verified: user.email_verified,
            display_name: user.display_name,
            avatar_url: user.photo_url,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_user_from_userinfo_json() {
        let json = r#"{
            "sub": "u1",
            "email": "a@b.com",
            "email_verified": true,
            "name": "Alex",
            "picture": "https://example.com/a.png",
            "locale": "en"
        }"#;
        let user: ProviderUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.uid, "u1");
        assert_eq!(user.email.as_deref(), Some("a@b.com"));
        assert!(user.email_verified);
        assert_eq!(user.display_name.as_deref(), Some("Alex"));
        assert_eq!(user.photo_url.as_deref(), Some("https://example.com/a.png"));
    }

    #[test]
    fn test_provider_user_minimal_json() {
        let user: ProviderUser = serde_json::from_str(r#"{"sub": "u2"}"#).unwrap();
        assert_eq!(user, ProviderUser::new("u2"));
    }

    #[test]
    fn test_profile_from_provider_user() {
        let user = ProviderUser::new("u1")
            .with_email("a@b.com", true)
            .with_photo_url("avatar://1");
        let profile = UserProfile::from(&user);
        assert_eq!(profile.id, "u1");
        assert_eq!(profile.email.as_deref(), Some("a@b.com"));
        assert!(profile.email_verified);
        assert_eq!(profile.display_name, None);
        assert_eq!(profile.avatar_url.as_deref(), Some("avatar://1"));
        assert_eq!(profile, UserProfile::from(user));
    }

    #[test]
    fn test_profile_label_fallbacks() {
        let mut profile = UserProfile::from(ProviderUser::new("u1"));
        assert_eq!(profile.label(), "u1");

        profile.email = Some("a@b.com".to_string());
        assert_eq!(profile.label(), "a@b.com");

        // Blank display names are ignored
        profile.display_name = Some("  ".to_string());
        assert_eq!(profile.label(), "a@b.com");

        profile.display_name = Some("Alex".to_string());
        assert_eq!(profile.label(), "Alex");
    }
}
