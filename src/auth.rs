//! Path-token authentication for inbound webhooks

/// Compares the token taken from the route path with the configured secret.
///
/// The comparison is exact: no trimming, no case folding. Lengths are compared
/// up front; equal-length tokens are compared in constant time.
pub fn authenticate(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
