//! Secret-name validation for the HTTP surface.

use once_cell::sync::Lazy;
use regex::Regex;

pub const SECRET_NAME_MAX_LENGTH: usize = 255;

static SECRET_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9_\-./]*[a-zA-Z0-9])?$")
        .expect("Secret name regex is valid at compile time")
});

/// Whether `name` is acceptable as a path parameter.
///
/// Names are 1-255 printable ASCII characters, start and end alphanumeric,
/// and may contain `_ - . /` in between. `..` is rejected outright.
pub fn is_valid_secret_name(name: &str) -> bool {
    if name.is_empty() || name.len() > SECRET_NAME_MAX_LENGTH {
        return false;
    }

    if name.contains("..") || name.contains('\0') {
        return false;
    }

    if !name.bytes().all(|b| (32..=126).contains(&b)) {
        return false;
    }

    SECRET_NAME_PATTERN.is_match(name)
}
