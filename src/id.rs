use uuid::Uuid;

/// Time-ordered ids so freshly created rows sort after older ones.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}
