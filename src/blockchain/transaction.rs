//! Transaction data model and admission-rule validation.

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::amount::Amount;
use crate::error::NodeError;
use crate::hash::{is_reserved_sender, validate_address};

/// 128-bit opaque transaction identifier, rendered as 32 lowercase hex
/// chars on the wire, binary in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u128);

impl TransactionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        TransactionId(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for TransactionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:032x}", self.0))
    }
}

impl<'de> Deserialize<'de> for TransactionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let value = u128::from_str_radix(&s, 16).map_err(serde::de::Error::custom)?;
        Ok(TransactionId(value))
    }
}

/// Annotations are out-of-band metadata consensus never looks at.
/// `network` participates in the consensus hash when present;
/// `activity` never does.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Annotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub sender: String,
    pub recipient: String,
    pub fee: Amount,
    pub timestamp: u64,
    #[serde(flatten)]
    pub annotations: Annotations,
}

/// The exact field order required for consensus hashing:
/// `amount, sender, recipient, fee, transactionId, timestamp, [network]`.
/// Kept as a distinct type so adding a public-facing field to
/// `Transaction` can never silently perturb the hash.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsensusTransaction<'a> {
    amount: Amount,
    sender: &'a str,
    recipient: &'a str,
    fee: Amount,
    transaction_id: TransactionId,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<&'a str>,
}

impl Transaction {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: Amount,
        fee: Amount,
    ) -> Self {
        Transaction {
            transaction_id: TransactionId::generate(),
            amount,
            sender: sender.into(),
            recipient: recipient.into(),
            fee,
            timestamp: now_millis(),
            annotations: Annotations::default(),
        }
    }

    pub fn coinbase(recipient: impl Into<String>, reward: Amount) -> Self {
        Transaction::new(crate::hash::COINBASE_SENDER, recipient, reward, Amount::ZERO)
    }

    pub fn is_coinbase(&self) -> bool {
        self.sender == crate::hash::COINBASE_SENDER
    }

    fn consensus_view(&self) -> ConsensusTransaction<'_> {
        ConsensusTransaction {
            amount: self.amount,
            sender: &self.sender,
            recipient: &self.recipient,
            fee: self.fee,
            transaction_id: self.transaction_id,
            timestamp: self.timestamp,
            network: self.annotations.network.as_deref(),
        }
    }

    /// Serializes this transaction into the canonical, consensus-critical
    /// field order. Infallible in practice: every field type here always
    /// serializes.
    pub fn to_consensus_json(&self) -> serde_json::Value {
        serde_json::to_value(self.consensus_view()).expect("consensus transaction always serializes")
    }

    /// Structural/admission validation shared verbatim by `Mempool::admit`
    /// and `Chain::validate_chain`, so the two paths can never diverge on
    /// what counts as a well-formed transaction.
    /// Balance sufficiency is checked separately by the caller, since it
    /// depends on chain state this function doesn't have access to.
    pub fn validate_shape(&self, min_fee: Amount) -> Result<(), NodeError> {
        if self.sender == self.recipient {
            return Err(NodeError::InvalidTransaction(
                "sender and recipient must differ".into(),
            ));
        }
        if self.amount.is_zero() {
            return Err(NodeError::InvalidTransaction(
                "amount must be positive".into(),
            ));
        }
        if !is_reserved_sender(&self.sender) && !validate_address(&self.sender) {
            return Err(NodeError::InvalidAddress(format!(
                "sender address malformed: {}",
                self.sender
            )));
        }
        if !is_reserved_sender(&self.recipient) && !validate_address(&self.recipient) {
            return Err(NodeError::InvalidAddress(format!(
                "recipient address malformed: {}",
                self.recipient
            )));
        }
        if !is_reserved_sender(&self.sender) && self.fee < min_fee {
            return Err(NodeError::InvalidTransaction(format!(
                "fee {} below minimum {}",
                self.fee, min_fee
            )));
        }
        Ok(())
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::encode_address;

    fn addr(byte: u8) -> String {
        encode_address(&[byte; 20])
    }

    #[test]
    fn self_send_is_rejected() {
        let a = addr(1);
        let tx = Transaction::new(a.clone(), a, Amount::from_f64(1.0), Amount::from_f64(0.001));
        assert!(tx.validate_shape(Amount::from_f64(0.001)).is_err());
    }

    #[test]
    fn fee_below_floor_is_rejected_for_normal_sender() {
        let tx = Transaction::new(addr(1), addr(2), Amount::from_f64(10.0), Amount::ZERO);
        assert!(tx.validate_shape(Amount::from_f64(0.001)).is_err());
    }

    #[test]
    fn fee_at_floor_is_accepted() {
        let tx = Transaction::new(
            addr(1),
            addr(2),
            Amount::from_f64(10.0),
            Amount::from_f64(0.001),
        );
        assert!(tx.validate_shape(Amount::from_f64(0.001)).is_ok());
    }

    #[test]
    fn reserved_sender_bypasses_fee_floor() {
        let tx = Transaction::new("FAUCET", addr(1), Amount::from_f64(100.0), Amount::ZERO);
        assert!(tx.validate_shape(Amount::from_f64(0.001)).is_ok());
    }

    #[test]
    fn consensus_json_omits_activity_and_keeps_field_order() {
        let mut tx = Transaction::new(addr(1), addr(2), Amount::from_f64(1.0), Amount::from_f64(0.001));
        tx.annotations.activity = Some("swap".into());
        let value = tx.to_consensus_json();
        let keys: Vec<&String> = value.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["amount", "sender", "recipient", "fee", "transactionId", "timestamp"]);
    }

    #[test]
    fn consensus_json_includes_network_when_present() {
        let mut tx = Transaction::new(addr(1), addr(2), Amount::from_f64(1.0), Amount::from_f64(0.001));
        tx.annotations.network = Some("mainnet".into());
        let value = tx.to_consensus_json();
        assert_eq!(value["network"], "mainnet");
    }

    #[test]
    fn transaction_id_round_trips_through_json() {
        let id = TransactionId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let back: TransactionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
