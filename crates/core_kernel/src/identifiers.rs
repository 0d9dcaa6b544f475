//! Typed UUID identifiers
//!
//! Bills, receipts and the collaborator records they point at all use UUID
//! keys; wrapping each in its own type keeps a `PatientId` from being passed
//! where a `BillId` is expected. Fresh ids are UUID v7 so they sort by
//! creation time, which keeps receipt listings and index pages ordered.
//!
//! The textual form carries a short tag (`BILL-0190...`); parsing accepts it
//! with or without the tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident => $tag:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Tag used in the textual form
            pub const PREFIX: &'static str = $tag;

            pub fn new() -> Self {
                Self(Uuid::now_v7())
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
                write!(f, "{}-{}", Self::PREFIX, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s
                    .strip_prefix(Self::PREFIX)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .unwrap_or(s);
                Uuid::parse_str(raw).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

typed_id!(
    /// Key of a patient bill
    BillId => "BILL"
);
typed_id!(
    /// Key of a payment receipt
    ReceiptId => "RCT"
);
typed_id!(PatientId => "PAT");
typed_id!(VisitId => "VIS");
typed_id!(
    /// Entry in the service price catalog
    ServiceId => "SVC"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_tag() {
        assert!(BillId::new().to_string().starts_with("BILL-"));
    }

    #[test]
    fn test_parse_with_and_without_tag() {
        let original = ReceiptId::new();
        let tagged: ReceiptId = original.to_string().parse().unwrap();
        let bare: ReceiptId = original.as_uuid().to_string().parse().unwrap();
        assert_eq!(tagged, original);
        assert_eq!(bare, original);
    }

    #[test]
    fn test_other_tag_is_rejected() {
        let text = PatientId::new().to_string().replacen("PAT", "VIS", 1);
        assert!(text.parse::<PatientId>().is_err());
    }
}
