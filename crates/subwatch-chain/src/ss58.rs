//! SS58 address encoding for validator listings.

const SS58_PREFIX: &[u8] = b"SS58PRE";

/// Address format used when a chain reports one outside the SS58 range.
pub const GENERIC_SS58_FORMAT: u16 = 42;

/// Encode the one- or two-byte address type.
fn address_type(format: u16) -> Vec<u8> {
    match format {
        0..=63 => vec![format as u8],
        64..=16383 => {
            let first = ((format & 0x00FC) >> 2) as u8 | 0x40;
            let second = ((format >> 8) as u8) | ((format & 0x03) << 6) as u8;
            vec![first, second]
        }
        _ => vec![GENERIC_SS58_FORMAT as u8],
    }
}

/// Encode a 32-byte account id as an SS58 address.
pub fn encode_ss58(account: &[u8; 32], format: u16) -> String {
    let mut payload = address_type(format);
    payload.extend_from_slice(account);

    // Checksum is the first two bytes of blake2b-512("SS58PRE" ++ payload)
    let mut checksum_input = SS58_PREFIX.to_vec();
    checksum_input.extend_from_slice(&payload);
    let hash = sp_crypto_hashing::blake2_512(&checksum_input);
    payload.extend_from_slice(&hash[..2]);

    bs58::encode(payload).into_string()
}
