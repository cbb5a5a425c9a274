use crate::model::Ms;

// Tenants
pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 256;

// Registry
pub const MAX_PRACTICES_PER_TENANT: usize = 1_000;
pub const MAX_VETS_PER_TENANT: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TIMEZONE_LEN: usize = 64;

// Per-vet state
pub const MAX_BLOCKS_PER_VET: usize = 50_000;
pub const MAX_APPOINTMENTS_PER_VET: usize = 100_000;
pub const MAX_METADATA_LEN: usize = 1_024;

// Durations
pub const MAX_APPOINTMENT_MINUTES: u32 = 24 * 60;
pub const MIN_GRANULARITY_MINUTES: u32 = 5;
pub const MAX_GRANULARITY_MINUTES: u32 = 240;
pub const MAX_NO_SHOW_GRACE_MINUTES: u32 = 24 * 60;

// Search
pub const MAX_SEARCH_DAYS: i64 = 92;
pub const MAX_SEARCH_RESULTS: usize = 50;
pub const MAX_SEARCH_VETS: usize = 200;

// Instants: 2000-01-01 .. 2100-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

// Protocol
pub const MAX_LINE_BYTES: usize = 64 * 1024;
