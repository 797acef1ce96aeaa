// OID masks: `*` matches any run of characters (including none) and the
// whole OID must match. Every other character is literal.

/// Whether `key` is a mask rather than an exact OID.
pub fn is_mask(key: &str) -> bool {
    key.contains('*')
}

/// Anchored wildcard match of `oid` against `mask`.
pub fn oid_match(oid: &str, mask: &str) -> bool {
    let parts: Vec<&str> = mask.split('*').collect();
    let [first, middle @ .., last] = parts.as_slice() else {
        return oid == mask;
    };

    let Some(mut rest) = oid.strip_prefix(first) else {
        return false;
    };
    let Some(trimmed) = rest.strip_suffix(last) else {
        return false;
    };
    rest = trimmed;

    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}
