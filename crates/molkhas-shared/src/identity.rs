//! The authenticated account and display-name derivation.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_DISPLAY_NAME;
use crate::ids::UserId;

/// The authenticated user as reported by the auth collaborator.
///
/// The elevated role claim, when present, is trusted immediately;
/// otherwise privilege is resolved against the privilege table in the
/// background.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: UserId,
    pub email: String,
    /// Display name the user set on their profile.
    pub profile_name: Option<String>,
    /// Name supplied by a federated sign-in provider.
    pub provider_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Elevated-privilege role claim embedded in the session.
    pub elevated_claim: bool,
}

impl Account {
    /// Derive the name shown for this account.
    ///
    /// Resolution order: explicit profile name, then provider-supplied
    /// name, then the local part of the email, then a fixed fallback.
    pub fn display_name(&self) -> String {
        if let Some(name) = non_empty(self.profile_name.as_deref()) {
            return name.to_string();
        }
        if let Some(name) = non_empty(self.provider_name.as_deref()) {
            return name.to_string();
        }
        if let Some(local) = non_empty(self.email.split('@').next()) {
            return local.to_string();
        }
        DEFAULT_DISPLAY_NAME.to_string()
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}
