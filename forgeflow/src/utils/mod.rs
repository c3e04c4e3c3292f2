//! Utility functions for id generation and timestamp handling.

mod ids;
pub mod timestamps;

pub use ids::{generate_uuid, generate_uuid_v7, prefixed_id, sha256_hex, short_hash};
pub use timestamps::{duration_ms_between, iso_timestamp, now_utc, Timestamp};
