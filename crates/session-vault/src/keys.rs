//! Provider-scoped storage key layout.
//!
//! The external identity SDK discovers the current session by reading these
//! exact keys from storage. The prefix and suffixes are a compatibility
//! contract, not an internal naming choice.

/// Storage keys in the identity provider's expected layout.
pub struct ProviderKeys;

impl ProviderKeys {
    /// Fixed prefix scoping all session keys to the provider SDK.
    pub const PREFIX: &'static str = "CognitoIdentityServiceProvider";

    /// Suffix for the sign-in details JSON.
    pub const SIGN_IN_DETAILS: &'static str = "signInDetails";

    /// Suffix for the raw id token.
    pub const ID_TOKEN: &'static str = "idToken";

    /// Suffix for the raw access token.
    pub const ACCESS_TOKEN: &'static str = "accessToken";

    /// Suffix for the raw refresh token.
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    /// Suffix for the clock drift value.
    pub const CLOCK_DRIFT: &'static str = "clockDrift";

    /// Build a key namespaced by client id and user id.
    pub fn scoped(client_id: &str, user_id: &str, suffix: &str) -> String {
        format!("{}.{}.{}.{}", Self::PREFIX, client_id, user_id, suffix)
    }

    /// Build the last-auth-user key (client-scoped only, not user-scoped).
    pub fn last_auth_user(client_id: &str) -> String {
        format!("{}.{}.LastAuthUser", Self::PREFIX, client_id)
    }
}
