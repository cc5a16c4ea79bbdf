use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::opcodes;
use bitcoin::script::{Builder, ScriptBuf};
use bitcoin::{Address, Network, PublicKey};

/// Spending conditions of a swap output.
///
/// This is the redeem script a swap-address service is expected to hand back
/// from `CreateSwap`; the settlement service itself only receives it as bytes.
/// Useful for standing up such a service or building funding fixtures.
///
/// The claim branch is satisfied by the witness `[signature, preimage, script]`,
/// which is the stack the claim builder produces. The refund branch needs the
/// timeout to have passed and a signature from the refund key.
#[derive(Debug, Clone)]
pub struct HtlcSpec {
    pub payment_hash: [u8; 32],
    pub claim_pubkey: PublicKey,
    pub refund_pubkey: PublicKey,
    pub timeout_block_height: u32,
}

impl HtlcSpec {
    pub fn witness_script(&self) -> ScriptBuf {
        Builder::new()
            .push_opcode(opcodes::all::OP_SHA256)
            .push_slice(self.payment_hash)
            .push_opcode(opcodes::all::OP_EQUAL)
            .push_opcode(opcodes::all::OP_IF)
            .push_key(&self.claim_pubkey)
            .push_opcode(opcodes::all::OP_ELSE)
            .push_int(self.timeout_block_height as i64)
            .push_opcode(opcodes::all::OP_CLTV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_key(&self.refund_pubkey)
            .push_opcode(opcodes::all::OP_ENDIF)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script()
    }

    pub fn p2wsh_address(&self, network: Network) -> Address {
        Address::p2wsh(&self.witness_script(), network)
    }
}

/// Payment hash of `preimage`, as committed to by [`HtlcSpec::payment_hash`].
pub fn sha256_preimage(preimage: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(preimage).to_byte_array()
}
