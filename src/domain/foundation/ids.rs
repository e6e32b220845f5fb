//! UUID-backed identifiers for locally owned records.
//!
//! Stripe and HubSpot ids are opaque strings and live elsewhere
//! (`external_*` fields and `billing::crm_ids`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// A user account. Also the `sub` claim of bearer tokens and the
    /// `user_id` metadata on checkout sessions.
    UserId
);

uuid_id!(
    /// Local key of a subscription row, distinct from Stripe's `sub_...` id.
    SubscriptionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_parses_its_display_form() {
        let id = UserId::new();

        assert_eq!(id.to_string().parse::<UserId>().unwrap(), id);
        assert!("user-123".parse::<UserId>().is_err());
    }

    #[test]
    fn ids_serialize_as_bare_uuids() {
        let uuid = Uuid::new_v4();

        let json = serde_json::to_string(&SubscriptionId::from_uuid(uuid)).unwrap();

        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
