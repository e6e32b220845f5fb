//! Typed identifiers for CRM objects.
//!
//! HubSpot hands out opaque numeric strings for every object kind. Wrapping
//! each kind separately keeps a deal id from being passed where an invoice id
//! is expected along the contact → deal → invoice → line item → payment chain.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! crm_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

crm_id!(
    /// HubSpot contact id.
    CrmContactId
);
crm_id!(
    /// HubSpot deal id.
    CrmDealId
);
crm_id!(
    /// HubSpot invoice id.
    CrmInvoiceId
);
crm_id!(
    /// HubSpot line item id.
    CrmLineItemId
);
crm_id!(
    /// HubSpot commerce payment id.
    CrmPaymentId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_bare_strings() {
        let id = CrmDealId::new("987654");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"987654\"");

        let parsed: CrmDealId = serde_json::from_str("\"987654\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn display_is_the_raw_id() {
        assert_eq!(CrmContactId::new("51").to_string(), "51");
    }
}
