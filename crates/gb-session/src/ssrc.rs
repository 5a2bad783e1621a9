//! SSRC allocation: a 10-digit decimal string of the form
//! `<flag><domain><rand>`, retried against the process-wide registry
//! until a unique value is found or the attempt budget runs out.

use rand::Rng;

use crate::error::{Error, Result};

const MAX_ATTEMPTS: u32 = 16;
const REALTIME_FLAG: char = '0';

/// Derive the 5-character GB28181 domain code from a REGISTER
/// request-URI's user part: characters at index 3..8 (the digits
/// GB28181 defines as the administrative-division code), padding any
/// missing position with `'0'`.
pub fn derive_domain(request_uri_user: &str) -> String {
    let chars: Vec<char> = request_uri_user.chars().collect();
    (3..8).map(|i| *chars.get(i).unwrap_or(&'0')).collect()
}

/// Allocate a unique SSRC. `is_taken` is consulted against the
/// process-wide SSRC map for each candidate.
pub fn allocate(request_uri_user: &str, is_taken: impl Fn(u32) -> bool) -> Result<(u32, String)> {
    let domain = derive_domain(request_uri_user);
    let mut rng = rand::thread_rng();

    for _ in 0..MAX_ATTEMPTS {
        let rand_part: u32 = rng.gen_range(0..10_000);
        let decimal = format!("{REALTIME_FLAG}{domain}{rand_part:04}");
        let Ok(value) = decimal.parse::<u32>() else { continue };
        if !is_taken(value) {
            return Ok((value, decimal));
        }
    }

    Err(Error::SsrcExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_domain_from_long_user() {
        assert_eq!(derive_domain("34020000002000000001"), "20000");
    }

    #[test]
    fn pads_domain_for_short_user() {
        assert_eq!(derive_domain("12"), "00000");
    }

    #[test]
    fn allocates_unique_ssrc_when_none_taken() {
        let (value, decimal) = allocate("34020000002000000001", |_| false).unwrap();
        assert_eq!(decimal.len(), 10);
        assert_eq!(decimal.parse::<u32>().unwrap(), value);
        assert!(decimal.starts_with('0'));
    }

    #[test]
    fn fails_when_every_candidate_is_taken() {
        let result = allocate("34020000002000000001", |_| true);
        assert_eq!(result.unwrap_err(), Error::SsrcExhausted);
    }
}
