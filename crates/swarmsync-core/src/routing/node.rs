//! Storage/relay node identity

use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// The two public keys a node advertises
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeySet {
    /// Hex ed25519 key, identifies the node
    pub ed25519: String,
    /// Hex x25519 key, used for onion layer encryption
    pub x25519: String,
}

/// A storage/relay node. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snode {
    address: String,
    port: u16,
    keys: KeySet,
}

fn check_key(name: &str, key: &str) -> Result<(), SyncError> {
    let bytes = hex::decode(key).map_err(|e| SyncError::InvalidId(format!("{} key: {}", name, e)))?;
    if bytes.len() != 32 {
        return Err(SyncError::InvalidId(format!(
            "{} key must be 32 bytes, got {}",
            name,
            bytes.len()
        )));
    }
    Ok(())
}

impl Snode {
    /// Build a node, validating both keys
    pub fn new(address: impl Into<String>, port: u16, keys: KeySet) -> Result<Self, SyncError> {
        let address = address.into();
        if address.is_empty() {
            return Err(SyncError::InvalidId("empty node address".into()));
        }
        check_key("ed25519", &keys.ed25519)?;
        check_key("x25519", &keys.x25519)?;
        Ok(Self {
            address,
            port,
            keys: KeySet {
                ed25519: keys.ed25519.to_lowercase(),
                x25519: keys.x25519.to_lowercase(),
            },
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn keys(&self) -> &KeySet {
        &self.keys
    }
}

/// `address-port-ed25519-x25519`
impl fmt::Display for Snode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.address, self.port, self.keys.ed25519, self.keys.x25519
        )
    }
}

impl FromStr for Snode {
    type Err = SyncError;

    // Split from the right: the address itself may contain '-'
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().rsplitn(4, '-');
        let (Some(x25519), Some(ed25519), Some(port), Some(address)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SyncError::InvalidId(format!("malformed node: {}", s)));
        };
        let port = port
            .parse::<u16>()
            .map_err(|e| SyncError::InvalidId(format!("node port: {}", e)))?;
        Snode::new(
            address,
            port,
            KeySet {
                ed25519: ed25519.to_string(),
                x25519: x25519.to_string(),
            },
        )
    }
}

#[cfg(test)]
pub(crate) fn test_node(n: u8) -> Snode {
    Snode::new(
        format!("https://10.0.0.{}", n),
        22021,
        KeySet {
            ed25519: hex::encode([n; 32]),
            x25519: hex::encode([n.wrapping_add(100); 32]),
        },
    )
    .unwrap()
}
