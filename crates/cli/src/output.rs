//! User-facing progress on stdout. Diagnostics go through `tracing` instead.

use alloy::primitives::{Address, Bytes};
use wfctl_core::settings::EnvironmentSet;
use wfctl_registry::TxOutput;

/// Prints instructions for submitting calldata externally.
pub fn print_next_steps(chain_name: &str, to: Address, calldata: &Bytes) {
    println!();
    println!("Next steps:");
    println!("   1. Submit the following transaction on the target chain:");
    println!("      Chain:            {chain_name}");
    println!("      Contract Address: {to}");
    println!("   2. Use the following transaction data:");
    println!();
    println!("      {}", hex::encode(calldata));
    println!();
}

/// Reports the outcome of a registry write.
pub fn print_tx_output(env: &EnvironmentSet, out: &TxOutput, action: &str) {
    match out {
        TxOutput::Regular { tx_hash } | TxOutput::HwWallet { tx_hash } => {
            println!("Transaction confirmed");
            println!("{}", env.tx_url(&tx_hash.to_string()));
            println!("{action} succeeded");
        }
        TxOutput::Raw { to, calldata } => {
            println!("Transaction not sent on-chain.");
            println!("{action} transaction prepared");
            print_next_steps(&env.workflow_registry_chain_name, *to, calldata);
        }
    }
}
