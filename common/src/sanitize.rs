//! Normalization of user-supplied identifiers: phone numbers and device
//! fingerprints. Both are used verbatim as label values, so they are narrowed to
//! the character set Kubernetes labels tolerate well before they ever reach the
//! resource store.

/// Sanitizes a phone number into a label-safe string: space, `+`, `(` and `)`
/// become `-`; every other non `[A-Za-z0-9._-]` character is dropped; leading and
/// trailing non-alphanumeric characters are then stripped.
///
/// Idempotent: sanitizing an already-sanitized phone returns it unchanged.
pub fn sanitize_phone(input: &str) -> String {
    let mapped: String = input
        .chars()
        .map(|c| match c {
            ' ' | '+' | '(' | ')' => '-',
            c => c,
        })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '_' || *c == '-')
        .collect();

    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Filters a device fingerprint down to lowercase hex characters and truncates
/// it to 16 characters. A fingerprint with no hex characters at all sanitizes to
/// the empty string, which callers must treat as "no fingerprint supplied".
pub fn sanitize_fingerprint(input: &str) -> String {
    let filtered: String = input
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    filtered.chars().take(16).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitizes_phone_with_punctuation() {
        assert_eq!(sanitize_phone("+61 435 999 768"), "61-435-999-768");
        assert_eq!(sanitize_phone("+1 (415) 555-0100"), "1-415-555-0100");
    }

    #[test]
    fn sanitize_phone_is_idempotent() {
        let once = sanitize_phone("+61 435 999 768");
        let twice = sanitize_phone(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_empty_phone() {
        assert_eq!(sanitize_phone(""), "");
    }

    #[test]
    fn fingerprint_truncates_and_lowercases() {
        assert_eq!(
            sanitize_fingerprint("ABC123DEADBEEF0199"),
            "abc123deadbeef01"
        );
    }

    #[test]
    fn fingerprint_of_only_non_hex_is_empty() {
        assert_eq!(sanitize_fingerprint("!!!-zzz-qqq-???"), "");
    }
}
