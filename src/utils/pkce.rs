//! PKCE (Proof Key for Code Exchange) utilities for the authorization-code flow
//!
//! Implements challenge derivation and verification as specified in RFC 7636.
//! Public clients must present PKCE so that intercepted authorization codes
//! cannot be exchanged.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

/// Minimum length for code_verifier as per RFC 7636
pub const CODE_VERIFIER_MIN_LENGTH: usize = 43;

/// Maximum length for code_verifier as per RFC 7636
pub const CODE_VERIFIER_MAX_LENGTH: usize = 128;

/// Supported PKCE methods
pub const PKCE_METHOD_S256: &str = "S256";
pub const PKCE_METHOD_PLAIN: &str = "plain";

/// Verify code_verifier against code_challenge using the specified method
///
/// # Arguments
/// * `code_verifier` - The code verifier sent during token exchange
/// * `code_challenge` - The code challenge sent during authorization request
/// * `method` - The code challenge method ("S256" or "plain")
///
/// # Returns
/// * `true` if the code_verifier matches the code_challenge
/// * `false` if verification fails or the method is unsupported
pub fn verify_pkce(code_verifier: &str, code_challenge: &str, method: &str) -> bool {
    match method {
        PKCE_METHOD_S256 => {
            let computed_challenge = derive_s256_challenge(code_verifier);
            constant_time_compare(&computed_challenge, code_challenge)
        }
        PKCE_METHOD_PLAIN => constant_time_compare(code_verifier, code_challenge),
        _ => false, // Unsupported method
    }
}

/// Derive the S256 code_challenge from a code_verifier
///
/// S256: code_challenge = BASE64URL(SHA256(code_verifier)), no padding.
pub fn derive_s256_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    let hash = hasher.finalize();
    URL_SAFE_NO_PAD.encode(hash)
}

/// Validate code_verifier format according to RFC 7636
///
/// The code_verifier must be:
/// - Between 43 and 128 characters long
/// - Contain only unreserved URI characters: [A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"
pub fn validate_code_verifier(verifier: &str) -> bool {
    let len = verifier.len();

    if !(CODE_VERIFIER_MIN_LENGTH..=CODE_VERIFIER_MAX_LENGTH).contains(&len) {
        return false;
    }

    verifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '~')
}

/// Validate code_challenge format for the S256 method
///
/// An S256 challenge is a base64url-encoded SHA-256 digest: exactly 43
/// base64url characters.
pub fn validate_code_challenge(challenge: &str) -> bool {
    if challenge.len() != 43 {
        return false;
    }

    challenge
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Constant-time comparison over inputs padded to equal length.
///
/// Both strings are scanned to the longer length so timing does not reveal
/// where a shorter candidate diverges; the original lengths must still match.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let len = a.len().max(b.len());

    let mut result = 0u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        result |= x ^ y;
    }
    result == 0 && a.len() == b.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Known test vector from RFC 7636 Appendix B
    // code_verifier: dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk
    // code_challenge (S256): E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM

    #[test]
    fn test_verify_pkce_s256_valid() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        assert!(verify_pkce(verifier, challenge, "S256"));
    }

    #[test]
    fn test_verify_pkce_s256_invalid_verifier() {
        let verifier = "wrong_verifier_that_is_long_enough_to_pass_length_check";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        assert!(!verify_pkce(verifier, challenge, "S256"));
    }

    #[test]
    fn test_verify_pkce_plain_valid() {
        let verifier = "my_plain_code_verifier_that_is_at_least_43_chars";
        let challenge = "my_plain_code_verifier_that_is_at_least_43_chars";

        assert!(verify_pkce(verifier, challenge, "plain"));
    }

    #[test]
    fn test_verify_pkce_plain_invalid() {
        let verifier = "my_plain_code_verifier_that_is_at_least_43_chars";
        let challenge = "different_challenge_value_that_is_also_long_enough";

        assert!(!verify_pkce(verifier, challenge, "plain"));
    }

    #[test]
    fn test_verify_pkce_unsupported_method() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        assert!(!verify_pkce(verifier, challenge, "unsupported"));
    }

    #[test]
    fn test_derive_s256_challenge() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let expected = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

        assert_eq!(derive_s256_challenge(verifier), expected);
    }

    #[test]
    fn test_validate_code_verifier_boundaries() {
        // 42 rejected, 43 accepted, 128 accepted, 129 rejected
        assert!(!validate_code_verifier(&"a".repeat(42)));
        assert!(validate_code_verifier(&"a".repeat(43)));
        assert!(validate_code_verifier(&"a".repeat(128)));
        assert!(!validate_code_verifier(&"a".repeat(129)));
    }

    #[test]
    fn test_validate_code_verifier_charset() {
        let verifier_special = "abcABC123-._~abcABC123-._~abcABC123-._~abcde";
        assert!(validate_code_verifier(verifier_special));

        // Contains space
        assert!(!validate_code_verifier(
            "abcdefghijklmnopqrstuvwxyz0123456789 abcdef"
        ));
        // Contains +
        assert!(!validate_code_verifier(
            "abcdefghijklmnopqrstuvwxyz0123456789+abcdef"
        ));
        // Contains /
        assert!(!validate_code_verifier(
            "abcdefghijklmnopqrstuvwxyz0123456789/abcdef"
        ));
        // Contains =
        assert!(!validate_code_verifier(
            "abcdefghijklmnopqrstuvwxyz0123456789=abcdef"
        ));
    }

    #[test]
    fn test_validate_code_challenge_valid() {
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert!(validate_code_challenge(challenge));
    }

    #[test]
    fn test_validate_code_challenge_wrong_length() {
        assert!(!validate_code_challenge(
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw"
        ));
        assert!(!validate_code_challenge(
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cMx"
        ));
    }

    #[test]
    fn test_validate_code_challenge_invalid_chars() {
        // Contains + (not valid base64url)
        assert!(!validate_code_challenge(
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw+cM"
        ));
    }

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn test_constant_time_compare_not_equal() {
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hello!"));
        assert!(!constant_time_compare("hello", "hell"));
    }

    proptest! {
        // For every valid verifier, derive then verify holds.
        #[test]
        fn derive_then_verify_holds(verifier in "[A-Za-z0-9._~-]{43,128}") {
            let challenge = derive_s256_challenge(&verifier);
            prop_assert!(verify_pkce(&verifier, &challenge, PKCE_METHOD_S256));
        }

        // A different verifier never matches the original challenge.
        #[test]
        fn tampered_verifier_fails(
            verifier in "[A-Za-z0-9._~-]{43,128}",
            other in "[A-Za-z0-9._~-]{43,128}",
        ) {
            prop_assume!(verifier != other);
            let challenge = derive_s256_challenge(&verifier);
            prop_assert!(!verify_pkce(&other, &challenge, PKCE_METHOD_S256));
        }
    }
}
