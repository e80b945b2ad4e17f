//! Pure derivation rules tying `Equipment.status` to custody state. No I/O
//! here; the engine and the reconciliation job both call through these so the
//! two can never disagree about what "consistent" means.

use crate::model::{Equipment, EquipmentStatus};

/// Statuses from which equipment may be handed out. `MAINTENANCE` stays
/// assignable so a machine can be reserved ahead of the work finishing.
pub const ASSIGNABLE_STATUSES: &[EquipmentStatus] =
    &[EquipmentStatus::Available, EquipmentStatus::Maintenance];

/// Map custody state onto the status field. An active record always means
/// `ASSIGNED`; with no active record the status is unresolved here, because
/// the caller decides between `AVAILABLE` and a forced operational status.
pub fn derive_status_from_custody(has_active_custody: bool) -> Option<EquipmentStatus> {
    if has_active_custody {
        Some(EquipmentStatus::Assigned)
    } else {
        None
    }
}

pub fn is_assignable_status(status: EquipmentStatus) -> bool {
    ASSIGNABLE_STATUSES.contains(&status)
}

/// True iff the equipment can receive a new custody record right now.
pub fn is_eligible_for_assignment(equipment: &Equipment, has_active_custody: bool) -> bool {
    equipment.is_active && is_assignable_status(equipment.status) && !has_active_custody
}

/// Whether `status` matches what the custody records say. Used by the
/// reconciliation scan and the `custody_coherence` health check.
pub fn is_coherent(status: EquipmentStatus, active_custody_count: i64) -> bool {
    match status {
        EquipmentStatus::Assigned => active_custody_count == 1,
        // Forced operational statuses may legitimately coexist with zero
        // active records; AVAILABLE requires zero.
        _ => active_custody_count == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Equipment;

    fn equipment(status: EquipmentStatus, is_active: bool) -> Equipment {
        Equipment {
            id: "e1".into(),
            inventory_no: "INV-001".into(),
            name: "Drill".into(),
            serial_no: None,
            barcode: None,
            status,
            condition: "GOOD".into(),
            purchase_price: None,
            depreciation_rate: None,
            current_value: None,
            warranty_until: None,
            location: None,
            is_active,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn active_custody_derives_assigned() {
        assert_eq!(
            derive_status_from_custody(true),
            Some(EquipmentStatus::Assigned)
        );
        assert_eq!(derive_status_from_custody(false), None);
    }

    #[test]
    fn available_and_maintenance_are_assignable() {
        assert!(is_eligible_for_assignment(
            &equipment(EquipmentStatus::Available, true),
            false
        ));
        assert!(is_eligible_for_assignment(
            &equipment(EquipmentStatus::Maintenance, true),
            false
        ));
    }

    #[test]
    fn terminal_statuses_are_not_assignable() {
        for status in [
            EquipmentStatus::Assigned,
            EquipmentStatus::Retired,
            EquipmentStatus::Damaged,
            EquipmentStatus::Lost,
        ] {
            assert!(!is_eligible_for_assignment(&equipment(status, true), false));
        }
    }

    #[test]
    fn soft_deleted_equipment_is_never_assignable() {
        assert!(!is_eligible_for_assignment(
            &equipment(EquipmentStatus::Available, false),
            false
        ));
    }

    #[test]
    fn existing_custody_blocks_assignment() {
        assert!(!is_eligible_for_assignment(
            &equipment(EquipmentStatus::Available, true),
            true
        ));
    }

    #[test]
    fn coherence_tracks_active_record_count() {
        assert!(is_coherent(EquipmentStatus::Assigned, 1));
        assert!(!is_coherent(EquipmentStatus::Assigned, 0));
        assert!(!is_coherent(EquipmentStatus::Assigned, 2));
        assert!(is_coherent(EquipmentStatus::Available, 0));
        assert!(!is_coherent(EquipmentStatus::Available, 1));
        assert!(is_coherent(EquipmentStatus::Maintenance, 0));
    }
}
