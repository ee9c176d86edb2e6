use failure::Fail;

/// Outcomes of a store-internal `add`, before server dispatch maps them onto
/// wire response codes.
#[derive(Debug, Fail, PartialEq, Eq)]
pub enum CacheError {
    #[fail(display = "a live session already exists with this id")]
    Duplicate,
    #[fail(display = "requested timeout exceeds MAX_EXPIRY_MS")]
    RangeTimeout,
    #[fail(display = "session id length is zero or exceeds MAX_ID_LEN")]
    RangeId,
    #[fail(display = "session blob length is zero or exceeds MAX_DATA_LEN")]
    RangeData,
}
