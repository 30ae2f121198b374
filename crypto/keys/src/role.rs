// Copyright (c) 2024 The Morphene Developers

use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};

use crate::KeyError;

/// The authority a key is held for.
///
/// Owner keys can replace every other key on the account, active keys move
/// funds, posting keys publish content and vote, and memo keys encrypt
/// transfer memos and sign off-chain messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Active,
    Posting,
    Memo,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Owner, Role::Active, Role::Posting, Role::Memo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Active => "active",
            Role::Posting => "posting",
            Role::Memo => "memo",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| KeyError::UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_text_roundtrip() {
        for role in Role::ALL {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_order_follows_authority_level() {
        let mut roles = vec![Role::Memo, Role::Owner, Role::Posting, Role::Active];
        roles.sort();
        assert_eq!(roles, Role::ALL.to_vec());
    }
}
