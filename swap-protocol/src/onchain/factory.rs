//! Deterministic escrow factory.
//!
//! An instance identity is `keccak256(0xff ‖ factory ‖ salt ‖ codeHash)`, the CREATE2
//! preimage, kept at its full 32 bytes. Ledger-specific truncation only happens in
//! [`InstanceAddress::to_ledger_address`].

use crate::data_structures::{Hash, Salt};
use crate::onchain::escrow_contract::{EscrowError, EscrowInstance};
use crate::onchain::events::EscrowEvent;
use crate::onchain::timelocks::LegKind;
use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceAddress(pub H256);

impl InstanceAddress {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_fixed_bytes()
    }

    pub fn to_ledger_address(&self, format: AddressFormat) -> LedgerAddress {
        match format {
            AddressFormat::Evm => LedgerAddress::Evm(Address::from_slice(&self.0.as_bytes()[12..])),
            AddressFormat::Substrate => LedgerAddress::Substrate(self.0),
        }
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_bytes()))
    }
}

/// How a ledger presents account addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFormat {
    /// 20 bytes: the low-order bytes of the identity, as CREATE2 does.
    Evm,
    /// 32 bytes: the identity unchanged.
    Substrate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerAddress {
    Evm(Address),
    Substrate(H256),
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerAddress::Evm(address) => write!(f, "0x{}", hex::encode(address.as_bytes())),
            LedgerAddress::Substrate(account) => write!(f, "0x{}", hex::encode(account.as_bytes())),
        }
    }
}

/// The factory's own on-ledger identity, in whatever width the ledger uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FactoryIdentity {
    Evm(Address),
    Raw(H256),
}

impl FactoryIdentity {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FactoryIdentity::Evm(address) => address.as_bytes(),
            FactoryIdentity::Raw(account) => account.as_bytes(),
        }
    }
}

/// Code hashes of the two escrow implementations a factory clones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationCode {
    pub source: Hash,
    pub destination: Hash,
}

impl ImplementationCode {
    pub fn from_bytecode(source: &[u8], destination: &[u8]) -> Self {
        ImplementationCode {
            source: code_hash(source),
            destination: code_hash(destination),
        }
    }

    pub fn code_hash(&self, kind: LegKind) -> Hash {
        match kind {
            LegKind::Source => self.source,
            LegKind::Destination => self.destination,
        }
    }
}

pub fn code_hash(bytecode: &[u8]) -> Hash {
    Hash::from(keccak256(bytecode))
}

/// Pure address derivation; any observer can run it before the instance exists.
pub fn derive_instance_address(
    factory: &FactoryIdentity,
    code_hash: &Hash,
    salt: &Salt,
) -> InstanceAddress {
    let factory_bytes = factory.as_bytes();
    let mut preimage = Vec::with_capacity(1 + factory_bytes.len() + 64);
    preimage.push(0xff);
    preimage.extend_from_slice(factory_bytes);
    preimage.extend_from_slice(salt.as_bytes());
    preimage.extend_from_slice(code_hash.as_bytes());
    InstanceAddress(H256::from(keccak256(preimage)))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub kind: LegKind,
    pub salt: Salt,
}

#[derive(Clone, Debug)]
pub struct EscrowFactory {
    identity: FactoryIdentity,
    code: ImplementationCode,
    deployed: HashMap<InstanceAddress, Deployment>,
}

impl EscrowFactory {
    pub fn new(identity: FactoryIdentity, code: ImplementationCode) -> Self {
        EscrowFactory { identity, code, deployed: HashMap::new() }
    }

    pub fn identity(&self) -> &FactoryIdentity {
        &self.identity
    }

    pub fn implementation_code(&self) -> &ImplementationCode {
        &self.code
    }

    pub fn predict(&self, kind: LegKind, salt: &Salt) -> InstanceAddress {
        derive_instance_address(&self.identity, &self.code.code_hash(kind), salt)
    }

    /// Deploys an uninitialized instance at `predict(kind, salt)`.
    pub fn create(
        &mut self,
        kind: LegKind,
        salt: Salt,
    ) -> Result<(EscrowInstance, EscrowEvent), EscrowError> {
        let address = self.predict(kind, &salt);
        if self.deployed.contains_key(&address) {
            return Err(EscrowError::AlreadyDeployed(address));
        }
        self.deployed.insert(address, Deployment { kind, salt });
        debug!("Factory: deployed {} escrow at {} (salt {:?})", kind, address, salt);

        let event = EscrowEvent::InstanceCreated { address, salt, kind };
        Ok((EscrowInstance::new(address, kind), event))
    }

    pub fn deployment(&self, address: &InstanceAddress) -> Option<&Deployment> {
        self.deployed.get(address)
    }

    pub fn is_deployed(&self, address: &InstanceAddress) -> bool {
        self.deployed.contains_key(address)
    }
}
