//! Auth material classification enums.
//!
//! Each enum has a stable snake_case string form used for persistence.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Lifecycle status of an auth material record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Active,
    Inactive,
    Revoked,
    Expired,
}

/// Kind of credential stored in an auth material record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMaterialType {
    Password,
    AccessToken,
    RefreshToken,
    ApiKey,
    ClientSecret,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenFormat {
    Opaque,
    Jwt,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenUse {
    Access,
    Refresh,
    Id,
}

macro_rules! impl_str_enum {
    ($t:ty, $name:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $t {
            type Err = AuthError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(AuthError::invalid_input(format!(
                        "unknown {}: '{}'",
                        $name, other
                    ))),
                }
            }
        }
    };
}

impl_str_enum!(AuthStatus, "auth status", {
    Active => "active",
    Inactive => "inactive",
    Revoked => "revoked",
    Expired => "expired",
});

impl_str_enum!(AuthMaterialType, "material type", {
    Password => "password",
    AccessToken => "access_token",
    RefreshToken => "refresh_token",
    ApiKey => "api_key",
    ClientSecret => "client_secret",
});

impl_str_enum!(TokenFormat, "token format", {
    Opaque => "opaque",
    Jwt => "jwt",
});

impl_str_enum!(TokenUse, "token use", {
    Access => "access",
    Refresh => "refresh",
    Id => "id",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form_matches_serde_form() {
        for t in [
            AuthMaterialType::Password,
            AuthMaterialType::AccessToken,
            AuthMaterialType::RefreshToken,
            AuthMaterialType::ApiKey,
            AuthMaterialType::ClientSecret,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
            assert_eq!(t.as_str().parse::<AuthMaterialType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("deleted".parse::<AuthStatus>().is_err());
        assert_eq!("expired".parse::<AuthStatus>().unwrap(), AuthStatus::Expired);
    }
}
