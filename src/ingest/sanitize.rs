//! Text cleanup applied to chunks before they reach storage.

use std::borrow::Cow;

/// Remove every NUL character, borrowing when there is nothing to strip.
pub fn strip_nul(value: &str) -> Cow<'_, str> {
    if value.contains('\0') {
        Cow::Owned(value.replace('\0', ""))
    } else {
        Cow::Borrowed(value)
    }
}

/// Strip NUL characters in place.
pub(crate) fn strip_nul_owned(value: String) -> String {
    match strip_nul(&value) {
        Cow::Borrowed(_) => value,
        Cow::Owned(cleaned) => cleaned,
    }
}
