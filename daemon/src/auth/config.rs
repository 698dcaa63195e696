use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::auth::jwt::generate_secret_string;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Long-lived operator token; also required to mint sub-tokens.
    pub main_token: Cow<'static, str>,
    pub jwt_secret: Cow<'static, str>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            main_token: Cow::Owned(generate_secret_string(32).unwrap()),
            jwt_secret: Cow::Owned(generate_secret_string(32).unwrap()),
        }
    }
}
