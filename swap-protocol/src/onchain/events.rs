// Outward signals consumed by relayers and other observers

use crate::data_structures::{AccountId, Balance, Salt, Secret};
use crate::onchain::factory::InstanceAddress;
use crate::onchain::timelocks::LegKind;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEvent {
    InstanceCreated {
        address: InstanceAddress,
        salt: Salt,
        kind: LegKind,
    },
    PartClaimed {
        instance: InstanceAddress,
        part_index: u32,
        claimant: AccountId,
        recipient: AccountId,
        amount: Balance,
        // Published so the secret can be replayed on the other leg
        secret: Secret,
    },
    Refunded {
        instance: InstanceAddress,
        remaining: Balance,
        recipient: AccountId,
    },
}

impl EscrowEvent {
    pub fn instance(&self) -> InstanceAddress {
        match self {
            EscrowEvent::InstanceCreated { address, .. } => *address,
            EscrowEvent::PartClaimed { instance, .. } => *instance,
            EscrowEvent::Refunded { instance, .. } => *instance,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;

    #[test]
    fn events_serialize_with_tag() {
        let event = EscrowEvent::Refunded {
            instance: InstanceAddress(H256::repeat_byte(1)),
            remaining: 25,
            recipient: AccountId::new(1, "maker"),
        };
        let json = event.to_json().unwrap();
        assert!(json.starts_with("{\"refunded\":"));
        assert!(json.contains("\"remaining\":25"));

        let back: EscrowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.instance(), InstanceAddress(H256::repeat_byte(1)));
    }

    #[test]
    fn part_claimed_publishes_secret() {
        let secret = Secret::from_bytes([0x5a; 32]);
        let event = EscrowEvent::PartClaimed {
            instance: InstanceAddress(H256::zero()),
            part_index: 2,
            claimant: AccountId::new(2, "resolver"),
            recipient: AccountId::new(2, "maker"),
            amount: 25,
            secret,
        };
        let json = event.to_json().unwrap();
        assert!(json.contains(&hex::encode([0x5a; 32])));
    }
}
