use subtle::ConstantTimeEq;

/// Constant-time membership test for bearer tokens.
pub fn token_matches(candidate: &str, allowed: &[String]) -> bool {
    let mut matched = false;
    for token in allowed {
        matched |= bool::from(candidate.as_bytes().ct_eq(token.as_bytes()));
    }
    matched && !candidate.is_empty()
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
