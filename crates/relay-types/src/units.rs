//! Hex, address and decimal-unit helpers.

use sha3::{Digest, Keccak256};

use crate::{Hex, RelayError, Result};

/// Convert bytes to a 0x-prefixed hex string.
pub fn bytes_to_hex(bytes: &[u8]) -> Hex {
    format!("0x{}", hex::encode(bytes))
}

/// Encode an integer quantity as even-length 0x hex ("0x00" for zero).
pub fn to_quantity_hex(value: u128) -> Hex {
    let digits = format!("{:x}", value);
    if digits.len() % 2 == 1 {
        format!("0x0{}", digits)
    } else {
        format!("0x{}", digits)
    }
}

/// Parse a decimal string into base units with `decimals` fractional digits.
///
/// `parse_units("1.5", 18)` == 1_500_000_000_000_000_000.
pub fn parse_units(amount: &str, decimals: u32) -> Result<u128> {
    let amount = amount.trim();
    let invalid = || RelayError::InvalidAmount(amount.to_string());

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let fraction = fraction.trim_end_matches('0');
    if fraction.len() > decimals as usize {
        return Err(RelayError::InvalidAmount(format!(
            "{} has more than {} decimals",
            amount, decimals
        )));
    }

    let scale = 10u128.checked_pow(decimals).ok_or_else(invalid)?;
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| invalid())?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse::<u128>().map_err(|_| invalid())?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction_units))
        .ok_or_else(invalid)
}

/// Validate a 20-byte address and return its EIP-55 checksummed form.
pub fn to_checksum_address(address: &str) -> Result<String> {
    let raw = address.strip_prefix("0x").unwrap_or(address);
    if raw.len() != 40 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RelayError::InvalidHex(format!("not an address: {}", address)));
    }

    let lower = raw.to_ascii_lowercase();
    let digest = Keccak256::digest(lower.as_bytes());

    let checksummed: String = lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = (digest[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect();

    Ok(format!("0x{}", checksummed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units_whole_and_fraction() {
        assert_eq!(parse_units("1", 18).unwrap(), 1_000_000_000_000_000_000);
        assert_eq!(parse_units("0.05", 18).unwrap(), 50_000_000_000_000_000);
        assert_eq!(parse_units(".5", 6).unwrap(), 500_000);
        assert_eq!(parse_units("2.", 6).unwrap(), 2_000_000);
        assert_eq!(parse_units("1.500", 2).unwrap(), 150);
    }

    #[test]
    fn test_parse_units_rejects_garbage() {
        assert!(parse_units("", 18).is_err());
        assert!(parse_units(".", 18).is_err());
        assert!(parse_units("-1", 18).is_err());
        assert!(parse_units("1e5", 18).is_err());
        assert!(parse_units("1.2.3", 18).is_err());
        assert!(parse_units("0.001", 2).is_err());
    }

    #[test]
    fn test_quantity_hex_is_even_length() {
        assert_eq!(to_quantity_hex(0), "0x00");
        assert_eq!(to_quantity_hex(255), "0xff");
        assert_eq!(to_quantity_hex(256), "0x0100");
        assert_eq!(to_quantity_hex(1_000_000_000_000_000_000), "0x0de0b6b3a7640000");
    }

    #[test]
    fn test_checksum_address() {
        assert_eq!(
            to_checksum_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert_eq!(
            to_checksum_address("fb6916095ca1df60bb79ce92ce3ea74c37c5d359").unwrap(),
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359"
        );
        assert!(to_checksum_address("0x1234").is_err());
    }

    #[test]
    fn test_bytes_to_hex() {
        assert_eq!(bytes_to_hex(&[0xde, 0xad, 0xbe, 0xef]), "0xdeadbeef");
        assert_eq!(bytes_to_hex(&[]), "0x");
    }
}
