//! Fixed-layout instruction payloads
//!
//! Two payload families are hand-encoded here:
//!
//! ## Transfer-checked-with-fee (token program)
//!
//! ```text
//! [26][1][amount: u64 LE][decimals: u8][fee: u64 LE]   (19 bytes)
//! ```
//!
//! `26` selects the transfer-fee extension namespace, `1` the
//! transfer-checked-with-fee sub-instruction.
//!
//! ## Launchpad method calls
//!
//! ```text
//! [sha256("global:<method>")[..8]][args, little-endian]
//! ```

use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::tx_builder::errors::WorkflowError;

/// Token instruction tag of the transfer-fee extension namespace
pub const TRANSFER_FEE_EXTENSION: u8 = 26;

/// Transfer-fee sub-instruction: transfer checked with fee
pub const TRANSFER_CHECKED_WITH_FEE: u8 = 1;

/// Encoded length of a transfer-with-fee payload
pub const TRANSFER_WITH_FEE_LEN: usize = 2 + 8 + 1 + 8;

pub const CREATE_TAXED_TOKEN: &str = "create_taxed_token";
pub const CREATE_SOULBOUND_TOKEN: &str = "create_soulbound_token";

/// Arguments carried by a transfer-with-fee payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferWithFeeArgs {
    pub amount: u64,
    pub decimals: u8,
    pub fee: u64,
}

/// Encode a transfer-checked-with-fee payload
///
/// `decimals` must be the value the mint was created with; the token program
/// rejects the transfer otherwise.
pub fn encode_transfer_with_fee(amount: u64, decimals: u8, fee: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(TRANSFER_WITH_FEE_LEN);
    data.push(TRANSFER_FEE_EXTENSION);
    data.push(TRANSFER_CHECKED_WITH_FEE);
    data.extend_from_slice(&amount.to_le_bytes());
    data.push(decimals);
    data.extend_from_slice(&fee.to_le_bytes());
    data
}

/// Read the two selector bytes of a token instruction payload
pub fn selector_header(data: &[u8]) -> Option<[u8; 2]> {
    match data {
        [extension, sub, ..] => Some([*extension, *sub]),
        _ => None,
    }
}

/// Decode a transfer-with-fee payload
pub fn decode_transfer_with_fee(data: &[u8]) -> Result<TransferWithFeeArgs, WorkflowError> {
    if data.len() != TRANSFER_WITH_FEE_LEN {
        return Err(WorkflowError::Encoding(format!(
            "transfer-with-fee payload must be {} bytes, got {}",
            TRANSFER_WITH_FEE_LEN,
            data.len()
        )));
    }
    if selector_header(data) != Some([TRANSFER_FEE_EXTENSION, TRANSFER_CHECKED_WITH_FEE]) {
        return Err(WorkflowError::Encoding(format!(
            "unexpected selector bytes {:?}",
            &data[..2]
        )));
    }

    Ok(TransferWithFeeArgs {
        amount: read_u64_le(&data[2..10])?,
        decimals: data[10],
        fee: read_u64_le(&data[11..19])?,
    })
}

fn read_u64_le(bytes: &[u8]) -> Result<u64, WorkflowError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| WorkflowError::Encoding("expected 8 bytes for u64".to_string()))?;
    Ok(u64::from_le_bytes(array))
}

/// Method discriminator of the launchpad program
pub fn method_discriminator(method: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", method).as_bytes());
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&digest[..8]);
    discriminator
}

pub fn encode_create_taxed_token(decimals: u8, fee_basis_points: u16, maximum_fee: u64) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + 1 + 2 + 8);
    data.extend_from_slice(&method_discriminator(CREATE_TAXED_TOKEN));
    data.push(decimals);
    data.extend_from_slice(&fee_basis_points.to_le_bytes());
    data.extend_from_slice(&maximum_fee.to_le_bytes());
    data
}

pub fn encode_create_soulbound_token(decimals: u8) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + 1);
    data.extend_from_slice(&method_discriminator(CREATE_SOULBOUND_TOKEN));
    data.push(decimals);
    data
}

/// Parse a user-supplied amount, rejecting anything beyond 64 bits
pub fn parse_amount(input: &str) -> Result<u64, WorkflowError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::Encoding("amount is empty".to_string()));
    }
    let wide: u128 = trimmed
        .replace('_', "")
        .parse()
        .map_err(|_| WorkflowError::Encoding(format!("amount '{}' is not an unsigned integer", trimmed)))?;
    u64::try_from(wide)
        .map_err(|_| WorkflowError::Encoding(format!("amount {} exceeds 64 bits", wide)))
}

/// Parse a base58 address typed by the user
///
/// An empty input is a missing precondition, anything unparsable an
/// encoding error.
pub fn parse_address(input: &str) -> Result<Pubkey, WorkflowError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::PreconditionMissing("address is empty".to_string()));
    }
    Pubkey::from_str(trimmed)
        .map_err(|e| WorkflowError::Encoding(format!("invalid address '{}': {}", trimmed, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_with_fee_layout() {
        let data = encode_transfer_with_fee(100_000, 6, 1_000);
        assert_eq!(data.len(), TRANSFER_WITH_FEE_LEN);
        assert_eq!(&data[..2], &[26, 1]);
        assert_eq!(&data[2..10], &100_000u64.to_le_bytes());
        assert_eq!(data[10], 6);
        assert_eq!(&data[11..19], &1_000u64.to_le_bytes());
    }

    #[test]
    fn test_header_recovered() {
        let data = encode_transfer_with_fee(100_000, 6, 1_000);
        assert_eq!(selector_header(&data), Some([26, 1]));

        let args = decode_transfer_with_fee(&data).unwrap();
        assert_eq!(
            args,
            TransferWithFeeArgs {
                amount: 100_000,
                decimals: 6,
                fee: 1_000
            }
        );
    }

    #[test]
    fn test_extremes_survive_encoding() {
        let data = encode_transfer_with_fee(u64::MAX, u8::MAX, u64::MAX);
        let args = decode_transfer_with_fee(&data).unwrap();
        assert_eq!(args.amount, u64::MAX);
        assert_eq!(args.decimals, u8::MAX);
        assert_eq!(args.fee, u64::MAX);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert!(decode_transfer_with_fee(&[26, 1, 0]).is_err());

        let mut data = encode_transfer_with_fee(1, 6, 0);
        data[1] = 2;
        assert!(decode_transfer_with_fee(&data).is_err());

        assert_eq!(selector_header(&[26]), None);
    }

    #[test]
    fn test_method_discriminators() {
        assert_eq!(
            method_discriminator(CREATE_TAXED_TOKEN),
            [194, 6, 198, 119, 131, 103, 120, 147]
        );
        assert_eq!(
            method_discriminator(CREATE_SOULBOUND_TOKEN),
            [64, 35, 216, 175, 170, 132, 183, 99]
        );
    }

    #[test]
    fn test_launchpad_payloads() {
        let data = encode_create_taxed_token(6, 100, 1_000_000);
        assert_eq!(data.len(), 19);
        assert_eq!(data[8], 6);
        assert_eq!(&data[9..11], &100u16.to_le_bytes());
        assert_eq!(&data[11..19], &1_000_000u64.to_le_bytes());

        let data = encode_create_soulbound_token(9);
        assert_eq!(data.len(), 9);
        assert_eq!(data[8], 9);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1_000_000").unwrap(), 1_000_000);
        assert_eq!(parse_amount(" 42 ").unwrap(), 42);
        assert_eq!(parse_amount("18446744073709551615").unwrap(), u64::MAX);
        assert!(matches!(
            parse_amount("18446744073709551616"),
            Err(WorkflowError::Encoding(msg)) if msg.contains("64 bits")
        ));
        assert!(parse_amount("").is_err());
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("1.5").is_err());
    }

    #[test]
    fn test_parse_address() {
        let key = Pubkey::new_unique();
        assert_eq!(parse_address(&format!(" {} ", key)).unwrap(), key);
        assert!(matches!(parse_address(""), Err(WorkflowError::PreconditionMissing(_))));
        assert!(matches!(parse_address("not-base58!"), Err(WorkflowError::Encoding(_))));
    }
}
