//! Unit tests for the Identifiers module
//!
//! Tests cover creation, parsing, conversion and display formatting
//! for the billing and collaborator identifiers.

use core_kernel::{BillId, ReceiptId, PatientId, VisitId, ServiceId};
use uuid::Uuid;

mod bill_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        let id1 = BillId::new();
        let id2 = BillId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_ids_are_time_ordered() {
        let id1 = BillId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = BillId::new();
        let uuid1: Uuid = id1.into();
        let uuid2: Uuid = id2.into();
        assert!(uuid1 < uuid2);
    }

    #[test]
    fn test_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = BillId::from_uuid(uuid);
        assert_eq!(*id.as_uuid(), uuid);
    }

    #[test]
    fn test_prefix() {
        assert_eq!(BillId::PREFIX, "BILL");
    }

    #[test]
    fn test_from_str_with_prefix() {
        let original = BillId::new();
        let parsed: BillId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_from_str_without_prefix() {
        let uuid = Uuid::new_v4();
        let parsed: BillId = uuid.to_string().parse().unwrap();
        assert_eq!(*parsed.as_uuid(), uuid);
    }

    #[test]
    fn test_from_str_rejects_garbage() {
        assert!("BILL-xyz".parse::<BillId>().is_err());
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = BillId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));

        let back: BillId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

mod prefixes {
    use super::*;

    #[test]
    fn test_each_identifier_has_its_own_prefix() {
        assert!(ReceiptId::new().to_string().starts_with("RCT-"));
        assert!(PatientId::new().to_string().starts_with("PAT-"));
        assert!(VisitId::new().to_string().starts_with("VIS-"));
        assert!(ServiceId::new().to_string().starts_with("SVC-"));
    }

    #[test]
    fn test_default_creates_fresh_id() {
        assert_ne!(ReceiptId::default(), ReceiptId::default());
    }
}
