//! Identifier generation.

/// Generate a fresh work unit identifier.
#[must_use]
pub fn new_work_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
