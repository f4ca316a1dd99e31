//! Deployment manifest data model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DeployerError, DeployerResult};

/// Strkey address of an account or contract on the remote network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap an address string without validation.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(DeployerError::InvalidArguments(format!(
                "`{s}` is not an address"
            )));
        }
        Ok(Self(trimmed.to_owned()))
    }
}

/// Identity of a logic artifact: lower-case hex SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicHash(String);

impl LogicHash {
    /// Hash raw artifact bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogicHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation that produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Deploy,
    Upgrade,
    Reconciled,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Upgrade => "upgrade",
            Self::Reconciled => "reconciled",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One confirmed logic pointer change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub logic_address: Address,
    /// Unknown for entries rebuilt from remote state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_hash: Option<LogicHash>,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
}

impl HistoryEntry {
    /// Create an entry stamped with the current time.
    pub fn now(logic_address: Address, logic_hash: Option<LogicHash>, operation: Operation) -> Self {
        Self {
            logic_address,
            logic_hash,
            timestamp: Utc::now(),
            operation,
        }
    }
}

/// Local record of one proxy on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub network: String,
    pub proxy_address: Address,
    pub current_logic_address: Address,
    pub admin_address: Address,
    pub history: Vec<HistoryEntry>,
}

impl DeploymentRecord {
    /// Start a record whose logic pointer is the first entry's logic.
    pub fn new(
        network: impl Into<String>,
        proxy_address: Address,
        admin_address: Address,
        first: HistoryEntry,
    ) -> Self {
        Self {
            network: network.into(),
            proxy_address,
            current_logic_address: first.logic_address.clone(),
            admin_address,
            history: vec![first],
        }
    }

    /// Hash of the logic the proxy currently points at, when known.
    pub fn current_logic_hash(&self) -> Option<&LogicHash> {
        self.history
            .last()
            .filter(|entry| entry.logic_address == self.current_logic_address)
            .and_then(|entry| entry.logic_hash.as_ref())
    }

    /// Move the pointer and append the matching history entry in one step.
    pub fn apply(&mut self, mutation: RecordMutation) {
        if let Some(admin) = mutation.admin_address {
            self.admin_address = admin;
        }
        self.current_logic_address = mutation.entry.logic_address.clone();
        self.history.push(mutation.entry);
    }
}

/// A pointer move together with the history entry that records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMutation {
    pub admin_address: Option<Address>,
    pub entry: HistoryEntry,
}

impl RecordMutation {
    pub fn upgrade(logic_address: Address, logic_hash: LogicHash) -> Self {
        Self {
            admin_address: None,
            entry: HistoryEntry::now(logic_address, Some(logic_hash), Operation::Upgrade),
        }
    }

    pub fn reconciled(logic_address: Address, admin_address: Address) -> Self {
        Self {
            admin_address: Some(admin_address),
            entry: HistoryEntry::now(logic_address, None, Operation::Reconciled),
        }
    }
}

/// A logic instance already deployed on a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplementationRecord {
    pub address: Address,
    pub deployed_at: DateTime<Utc>,
}

/// Initializer arguments of the middleware, submitted once at deploy time.
///
/// Field names match the proxy contract's `MiddlewareConfig` so the value
/// can be passed to the contract as JSON unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiddlewareArgs {
    pub network: Address,
    pub operator_registry: Address,
    pub vault_factory: Address,
    pub operator_net_opt_in: Address,
    pub epoch_duration: u64,
    pub slashing_window: u64,
}

impl MiddlewareArgs {
    /// Shape check performed before anything is submitted.
    pub fn validate(&self) -> DeployerResult<()> {
        let addresses = [
            ("network", &self.network),
            ("operator_registry", &self.operator_registry),
            ("vault_factory", &self.vault_factory),
            ("operator_net_opt_in", &self.operator_net_opt_in),
        ];
        for (name, address) in addresses {
            if address.as_str().trim().is_empty() {
                return Err(DeployerError::InvalidArguments(format!("{name} is empty")));
            }
        }
        if self.epoch_duration == 0 {
            return Err(DeployerError::InvalidArguments(
                "epoch_duration must be non-zero".to_owned(),
            ));
        }
        if self.slashing_window == 0 {
            return Err(DeployerError::InvalidArguments(
                "slashing_window must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeploymentRecord {
        DeploymentRecord::new(
            "test",
            Address::new("CPROXY"),
            Address::new("GADMIN"),
            HistoryEntry::now(
                Address::new("CLOGIC1"),
                Some(LogicHash::of(b"v1")),
                Operation::Deploy,
            ),
        )
    }

    #[test]
    fn logic_hash_is_sha256_hex() {
        let hash = LogicHash::of(b"abc");
        assert_eq!(
            hash.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn apply_moves_pointer_and_appends_history() {
        let mut record = record();
        record.apply(RecordMutation::upgrade(
            Address::new("CLOGIC2"),
            LogicHash::of(b"v2"),
        ));

        assert_eq!(record.current_logic_address, Address::new("CLOGIC2"));
        assert_eq!(record.history.len(), 2);
        assert_eq!(record.history[1].operation, Operation::Upgrade);
        assert_eq!(record.current_logic_hash(), Some(&LogicHash::of(b"v2")));
    }

    #[test]
    fn reconciled_mutation_refreshes_admin_and_forgets_hash() {
        let mut record = record();
        record.apply(RecordMutation::reconciled(
            Address::new("CLOGIC9"),
            Address::new("GOTHER"),
        ));

        assert_eq!(record.admin_address, Address::new("GOTHER"));
        assert_eq!(record.current_logic_address, Address::new("CLOGIC9"));
        assert_eq!(record.current_logic_hash(), None);
        assert_eq!(record.history[1].operation, Operation::Reconciled);
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let json = serde_json::to_value(record()).unwrap();
        assert_eq!(json["proxyAddress"], "CPROXY");
        assert_eq!(json["currentLogicAddress"], "CLOGIC1");
        assert_eq!(json["history"][0]["operation"], "deploy");
    }

    #[test]
    fn address_parse_rejects_blank_and_spaced_input() {
        assert!("".parse::<Address>().is_err());
        assert!("C ABC".parse::<Address>().is_err());
        assert_eq!(" CABC ".parse::<Address>().unwrap(), Address::new("CABC"));
    }

    #[test]
    fn args_validation_rejects_zero_durations() {
        let mut args = MiddlewareArgs {
            network: Address::new("CA"),
            operator_registry: Address::new("CB"),
            vault_factory: Address::new("CC"),
            operator_net_opt_in: Address::new("CD"),
            epoch_duration: 86400,
            slashing_window: 86400,
        };
        assert!(args.validate().is_ok());

        args.slashing_window = 0;
        assert!(matches!(
            args.validate(),
            Err(DeployerError::InvalidArguments(_))
        ));
    }
}
