//! Request signing

use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

/// Strip every whitespace character (keys are often pasted with line breaks).
pub fn sanitize_key(key: &str) -> String {
    key.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Lower-case hex HMAC-SHA-512 of `body` keyed with `secret`.
pub fn sign(secret: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Delivery(format!("error generating mac: {}", e)))?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_all_whitespace() {
        assert_eq!(sanitize_key(" ab c\r\nd\t"), "abcd");
        assert_eq!(sanitize_key("clean"), "clean");
    }

    #[test]
    fn test_sign_matches_known_vector() {
        // RFC 4231, test case 2
        assert_eq!(
            sign("Jefe", "what do ya want for nothing?").unwrap(),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea2505549758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }

    #[test]
    fn test_sign_empty_batch() {
        let signature = sign("secret", "[]").unwrap();
        assert_eq!(signature.len(), 128);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            signature,
            "25b4ca9b52a77388ec16cbef0861d0ac235cfeca68d05dbb9079e915f8ef5d527676e337e6c77096745a9b89d9bf224d62aa8d0cacabb66f512310f7b05ee561"
        );
    }
}
