pub mod audit;
pub mod db;
pub mod engine;
pub mod equipment;
pub mod error;
pub mod health;
pub mod holders;
mod id;
pub mod logging;
pub mod maintenance;
pub mod migrate;
pub mod model;
pub mod reconcile;
pub mod status;
mod time;

pub use engine::{
    assign_equipment, force_status_change, return_equipment, AssignOptions, EngineError,
    ReturnOptions,
};
pub use error::{AppError, AppResult};
pub use model::{
    AuditAction, AuditEntry, CheckType, CustodyRecord, Equipment, EquipmentStatus, Holder,
    MaintenancePriority, MaintenanceRecord, MaintenanceStatus, MaintenanceType, VerificationCheck,
};
pub use reconcile::{run_reconciliation, ReconcileMode, ReconcileSummary};

pub fn init_logging() {
    logging::init();
}
