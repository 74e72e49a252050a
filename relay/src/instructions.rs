//! Builders for the fulfillment transaction's instructions.
//!
//! A fulfillment transaction contains:
//! 1. (Optional) A `set_compute_unit_price` instruction for priority fees.
//! 2. The coordinator's `fulfill_random_words_with_override` instruction,
//!    which stores the words and CPIs the callback into the consumer.

use alloy_primitives::U256;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::consumer_accounts::derive_callback_accounts;
use crate::randomness::RandomWords;

const COMPUTE_BUDGET_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("ComputeBudget111111111111111111111111111111");

/// Compute the Anchor instruction discriminator for
/// `fulfill_random_words_with_override`.
fn fulfill_discriminator() -> [u8; 8] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"global:fulfill_random_words_with_override");
    let hash = hasher.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// All instructions of one fulfillment, in order.
pub fn fulfillment_instructions(
    coordinator_program: &Pubkey,
    authority: &Pubkey,
    consumer_program: &Pubkey,
    request_id: U256,
    random_words: &RandomWords,
    priority_fee_micro_lamports: u64,
) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(2);
    if priority_fee_micro_lamports > 0 {
        instructions.push(build_set_compute_unit_price_instruction(
            priority_fee_micro_lamports,
        ));
    }
    instructions.push(build_fulfill_instruction(
        coordinator_program,
        authority,
        consumer_program,
        request_id,
        random_words,
    ));
    instructions
}

/// Build a `SetComputeUnitPrice` instruction.
fn build_set_compute_unit_price_instruction(micro_lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(9);
    data.push(3u8);
    data.extend_from_slice(&micro_lamports.to_le_bytes());
    Instruction {
        program_id: COMPUTE_BUDGET_PROGRAM_ID,
        accounts: vec![],
        data,
    }
}

/// Build the coordinator's `fulfill_random_words_with_override` instruction.
///
/// Data: discriminator (8) + request_id (32 LE) + consumer (32) +
/// vec len (4 LE) + words (2 × 32 LE).
fn build_fulfill_instruction(
    coordinator_program: &Pubkey,
    authority: &Pubkey,
    consumer_program: &Pubkey,
    request_id: U256,
    random_words: &RandomWords,
) -> Instruction {
    let id_bytes: [u8; 32] = request_id.to_le_bytes();
    let (config_pda, _) =
        Pubkey::find_program_address(&[b"coordinator-config"], coordinator_program);
    let (request_pda, _) =
        Pubkey::find_program_address(&[b"request", &id_bytes], coordinator_program);

    let mut data = Vec::with_capacity(8 + 32 + 32 + 4 + 32 * random_words.len());
    data.extend_from_slice(&fulfill_discriminator());
    data.extend_from_slice(&id_bytes);
    data.extend_from_slice(consumer_program.as_ref());
    data.extend_from_slice(&(random_words.len() as u32).to_le_bytes());
    for word in random_words {
        let word_bytes: [u8; 32] = word.to_le_bytes();
        data.extend_from_slice(&word_bytes);
    }

    let mut accounts = vec![
        AccountMeta::new(*authority, true),                       // authority (signer, payer)
        AccountMeta::new_readonly(config_pda, false),             // coordinator config PDA
        AccountMeta::new(request_pda, false),                     // randomness request PDA
        AccountMeta::new_readonly(*consumer_program, false),      // consumer program
    ];
    accounts.extend(derive_callback_accounts(consumer_program, request_id));

    Instruction {
        program_id: *coordinator_program,
        accounts,
        data,
    }
}
