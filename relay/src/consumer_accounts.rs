//! Derives the callback accounts of the NFT consumer program.
//!
//! When the coordinator fulfills a request it CPIs into the consumer's
//! `fulfill_random_words` instruction, which needs the consumer's own PDAs
//! passed as remaining_accounts.

use alloy_primitives::U256;
use solana_sdk::instruction::AccountMeta;
use solana_sdk::pubkey::Pubkey;

/// Derive the callback accounts for the NFT consumer program.
///
/// The consumer's `fulfill_random_words` instruction expects:
/// 1. coordinator_config (signer): provided automatically by the coordinator
/// 2. nft_config: PDA ["nft-config"]
/// 3. mint_request: PDA ["mint-request", request_id_le_bytes] (writable)
pub fn derive_callback_accounts(consumer_program: &Pubkey, request_id: U256) -> Vec<AccountMeta> {
    let (nft_config_pda, _) = Pubkey::find_program_address(&[b"nft-config"], consumer_program);

    let id_bytes: [u8; 32] = request_id.to_le_bytes();
    let (mint_request_pda, _) =
        Pubkey::find_program_address(&[b"mint-request", &id_bytes], consumer_program);

    vec![
        AccountMeta::new_readonly(nft_config_pda, false),
        AccountMeta::new(mint_request_pda, false),
    ]
}
