//! Opaque token generation for shares, undo handles and sessions.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// URL-safe token from `n` bytes of OS randomness. 24 bytes (192 bits) is the
/// default for anything that acts as a bearer credential.
pub fn urlsafe_token(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    // getrandom only fails when the OS entropy source is unavailable, which is
    // not a state this process can continue from.
    getrandom::getrandom(&mut bytes).expect("OS random source unavailable");
    URL_SAFE_NO_PAD.encode(bytes)
}
