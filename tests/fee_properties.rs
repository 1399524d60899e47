//! Property tests for the fee formula, address derivation and the
//! transfer-with-fee payload

use proptest::prelude::*;
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use taxed_token_sequencer::tx_builder::codec::{
    decode_transfer_with_fee, encode_transfer_with_fee, selector_header,
};
use taxed_token_sequencer::tx_builder::{compute_transfer_fee, derive_associated_address};

fn pubkey() -> impl Strategy<Value = Pubkey> {
    proptest::array::uniform32(any::<u8>()).prop_map(Pubkey::new_from_array)
}

proptest! {
    #[test]
    fn fee_never_exceeds_amount_or_cap(
        amount in any::<u64>(),
        bps in 0u16..=10_000,
        max_fee in any::<u64>(),
    ) {
        let fee = compute_transfer_fee(amount, bps, max_fee);
        prop_assert!(fee <= amount);
        prop_assert!(fee <= max_fee);
    }

    #[test]
    fn fee_matches_ceiling_formula(
        amount in any::<u64>(),
        bps in 0u16..=10_000,
        max_fee in any::<u64>(),
    ) {
        let product = amount as u128 * bps as u128;
        let mut ceil = product / 10_000;
        if product % 10_000 != 0 {
            ceil += 1;
        }
        let expected = ceil.min(max_fee as u128) as u64;
        prop_assert_eq!(compute_transfer_fee(amount, bps, max_fee), expected);
    }

    #[test]
    fn derivation_is_deterministic(mint in pubkey(), owner in pubkey()) {
        let token = spl_token_2022::id();
        let first = derive_associated_address(&mint, &owner, &token);
        let second = derive_associated_address(&mint, &owner, &token);
        prop_assert_eq!(first, second);
        prop_assert_eq!(
            first,
            get_associated_token_address_with_program_id(&owner, &mint, &token)
        );
    }

    #[test]
    fn transfer_payload_keeps_header(amount in any::<u64>(), decimals in any::<u8>(), fee in any::<u64>()) {
        let data = encode_transfer_with_fee(amount, decimals, fee);
        prop_assert_eq!(selector_header(&data), Some([26, 1]));
        let args = decode_transfer_with_fee(&data).unwrap();
        prop_assert_eq!((args.amount, args.decimals, args.fee), (amount, decimals, fee));
    }
}

#[test]
fn test_reference_transfer_header() {
    let data = encode_transfer_with_fee(100_000, 6, 1_000);
    assert_eq!(selector_header(&data), Some([26, 1]));
    assert_eq!(compute_transfer_fee(100_000, 100, 1_000_000), 1_000);
}
