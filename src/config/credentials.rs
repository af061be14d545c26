//! Miniserver user credentials

use crate::error::{LoxoneError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Loxone credentials structure
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoxoneCredentials {
    /// Username for Loxone authentication
    pub username: String,

    /// Password for Loxone authentication
    pub password: String,
}

impl fmt::Debug for LoxoneCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxoneCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl LoxoneCredentials {
    /// Load credentials from `LOXONE_USER` / `LOXONE_PASS`
    pub fn from_env() -> Result<Self> {
        let username = env::var("LOXONE_USER")
            .map_err(|_| LoxoneError::credentials("LOXONE_USER is not set"))?;
        let password = env::var("LOXONE_PASS")
            .map_err(|_| LoxoneError::credentials("LOXONE_PASS is not set"))?;
        Ok(create_credentials(username, password))
    }
}

/// Create credentials from username and password
pub fn create_credentials(username: impl Into<String>, password: impl Into<String>) -> LoxoneCredentials {
    LoxoneCredentials {
        username: username.into(),
        password: password.into(),
    }
}
