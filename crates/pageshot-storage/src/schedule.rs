//! Schedule storage - byte-level API for recurring capture persistence.

use crate::define_kv_storage;

define_kv_storage! {
    /// Low-level schedule storage with byte-level API
    pub struct ScheduleStorage { table: "schedules" }
}
