use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Authoritative, denormalized view of custody. `ASSIGNED` must agree with the
/// presence of an open custody record; the engine is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum EquipmentStatus {
    Available,
    Assigned,
    Maintenance,
    Retired,
    Damaged,
    Lost,
}

impl EquipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentStatus::Available => "AVAILABLE",
            EquipmentStatus::Assigned => "ASSIGNED",
            EquipmentStatus::Maintenance => "MAINTENANCE",
            EquipmentStatus::Retired => "RETIRED",
            EquipmentStatus::Damaged => "DAMAGED",
            EquipmentStatus::Lost => "LOST",
        }
    }
}

impl fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EquipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVAILABLE" => Ok(EquipmentStatus::Available),
            "ASSIGNED" => Ok(EquipmentStatus::Assigned),
            "MAINTENANCE" => Ok(EquipmentStatus::Maintenance),
            "RETIRED" => Ok(EquipmentStatus::Retired),
            "DAMAGED" => Ok(EquipmentStatus::Damaged),
            "LOST" => Ok(EquipmentStatus::Lost),
            other => Err(format!("unknown equipment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Assign,
    Return,
    Maintain,
    Check,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Assign => "ASSIGN",
            AuditAction::Return => "RETURN",
            AuditAction::Maintain => "MAINTAIN",
            AuditAction::Check => "CHECK",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Equipment {
    pub id: String,
    /// Immutable once issued; the human-facing asset tag.
    pub inventory_no: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub status: EquipmentStatus,
    /// Physical condition rating; orthogonal to the custody invariant.
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depreciation_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warranty_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CustodyRecord {
    pub id: String,
    pub equipment_id: String,
    pub holder_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_by: Option<String>,
    pub assigned_at: i64,
    /// Null while the record is active; set exactly once when custody ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_return_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_on_assign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_on_return: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CustodyRecord {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_values: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_values: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceType {
    Repair,
    Upgrade,
    Cleaning,
    Inspection,
    Calibration,
    SoftwareUpdate,
}

impl fmt::Display for MaintenanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaintenanceType::Repair => "REPAIR",
            MaintenanceType::Upgrade => "UPGRADE",
            MaintenanceType::Cleaning => "CLEANING",
            MaintenanceType::Inspection => "INSPECTION",
            MaintenanceType::Calibration => "CALIBRATION",
            MaintenanceType::SoftwareUpdate => "SOFTWARE_UPDATE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl fmt::Display for MaintenanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MaintenanceStatus::Scheduled => "SCHEDULED",
            MaintenanceStatus::InProgress => "IN_PROGRESS",
            MaintenanceStatus::Completed => "COMPLETED",
            MaintenanceStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenancePriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    Scheduled,
    Random,
    Incident,
    Annual,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckType::Scheduled => "SCHEDULED",
            CheckType::Random => "RANDOM",
            CheckType::Incident => "INCIDENT",
            CheckType::Annual => "ANNUAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MaintenanceRecord {
    pub id: String,
    pub equipment_id: String,
    pub maintenance_type: MaintenanceType,
    pub status: MaintenanceStatus,
    pub priority: MaintenancePriority,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MaintenanceRecord {
    /// Scheduled and in-progress records still accept lifecycle transitions.
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            MaintenanceStatus::Scheduled | MaintenanceStatus::InProgress
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VerificationCheck {
    pub id: String,
    pub equipment_id: String,
    pub check_type: CheckType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_by: Option<String>,
    pub checked_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub is_functional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Set once the holder acknowledges the check result.
    pub holder_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Holder {
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}
