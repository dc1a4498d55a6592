//! Debug formatting helpers for [`custom_debug_derive`].

use std::fmt;

/// Prints `"***"` for set secrets and `None` for missing ones.
///
/// Use with `#[debug(with = "crate::fmt::redacted")]` on credential fields.
pub fn redacted(value: &Option<String>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Some(_) => f.write_str("\"***\""),
        None => f.write_str("None"),
    }
}
