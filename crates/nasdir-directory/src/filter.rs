//! Search filter construction

/// Escape special characters in LDAP filter values (RFC 4515).
///
/// Characters that must be escaped: * ( ) \ NUL
pub fn escape_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

/// `(&<object>(<attr>=<value>))` with the value escaped.
pub fn and_equals(object: &str, attr: &str, value: &str) -> String {
    format!("(&{}({}={}))", object, attr, escape_value(value))
}

/// `(&<object>(<attr>=*))`.
pub fn and_present(object: &str, attr: &str) -> String {
    format!("(&{}({}=*))", object, attr)
}
