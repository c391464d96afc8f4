//! Size bounds enforced by the object model.

/// Longest string, in bytes, concatenation or builtins may produce.
pub const MAX_STRING_LEN: usize = 2_147_483_647;

/// Longest byte sequence concatenation or builtins may produce.
pub const MAX_BYTES_LEN: usize = 2_147_483_647;
