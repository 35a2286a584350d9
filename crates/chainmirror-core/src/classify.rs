//! Activity classification.
//!
//! A pure function of the transfer's endpoints and a few facts looked up by the
//! pipeline, so re-delivering an event always yields the same kind.

use crate::activity::ActivityKind;
use crate::types::Address;

/// Facts needed to classify one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationInput {
    pub from: Address,
    pub to: Address,
    /// A marketplace order was matched to the transfer's transaction.
    pub has_order: bool,
    /// The contract is the destination side of a bridge link.
    pub contract_bridged: bool,
    /// The token was delivered by someone other than its recipient.
    pub is_airdrop: bool,
    /// The recipient is the chain's bridge contract.
    pub to_bridge_boundary: bool,
}

pub fn classify(input: &ClassificationInput) -> ActivityKind {
    if input.from == Address::ZERO {
        if input.contract_bridged {
            ActivityKind::Bridge
        } else if input.is_airdrop {
            ActivityKind::Airdrop
        } else {
            ActivityKind::Mint
        }
    } else if input.to == Address::ZERO {
        if input.contract_bridged {
            ActivityKind::Bridge
        } else {
            ActivityKind::Burn
        }
    } else if input.has_order {
        ActivityKind::Sale
    } else if input.to_bridge_boundary {
        ActivityKind::Bridge
    } else {
        ActivityKind::Transfer
    }
}
