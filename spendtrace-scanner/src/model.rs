use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a transaction output. Used as the dedup key for the crawl.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoRef {
    pub txid: String,
    pub vout: u32,
}

impl UtxoRef {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }

    /// Key of the vertex this output becomes.
    ///
    /// Stable for a given (ref, script type) pair and unique per ref: the full
    /// txid, the output index and the script type.
    pub fn label(&self, script_type: &str) -> String {
        format!("{}:{} ({})", self.txid, self.vout, script_type)
    }

    /// Abbreviated label for narrow displays. Two refs can share one.
    pub fn short_label(&self, script_type: &str) -> String {
        let short = self.txid.get(..8).unwrap_or(&self.txid);
        format!("{}...:{} ({})", short, self.vout, script_type)
    }
}

impl fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub index: u32,
    pub value: u64,
    pub script_type: String,
}

/// The parts of a transaction the crawl needs: its id and its outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub txid: String,
    pub outputs: Vec<TxOutput>,
}

impl TransactionDetails {
    pub fn output(&self, index: u32) -> Result<&TxOutput> {
        self.outputs
            .iter()
            .find(|o| o.index == index)
            .ok_or_else(|| ScanError::InvalidIndex {
                txid: self.txid.clone(),
                index,
            })
    }

    pub fn script_type(&self, index: u32) -> Result<&str> {
        self.output(index).map(|o| o.script_type.as_str())
    }
}

/// Spend status of every output of one transaction, indexed by output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outspends(pub Vec<Option<String>>);

impl Outspends {
    /// Txid that spent `index`, or `None` if it is unspent (or not listed at all).
    pub fn spender(&self, index: u32) -> Option<&str> {
        self.0
            .get(index as usize)
            .and_then(|entry| entry.as_deref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A discovered output, as drawn in the spend graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub utxo: UtxoRef,
    pub label: String,
    pub script_type: String,
    pub depth: usize,
}

impl Vertex {
    pub fn short_label(&self) -> String {
        self.utxo.short_label(&self.script_type)
    }
}

/// A spend relationship between two vertices, weighted by the value moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub value: u64,
}

/// A terminal result: an output that is still unspent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub utxo: UtxoRef,
    pub label: String,
    pub script_type: String,
}

impl Finding {
    pub fn short_label(&self) -> String {
        self.utxo.short_label(&self.script_type)
    }
}

/// Txids are 32-byte hashes rendered as 64 hex characters.
pub fn is_valid_txid(txid: &str) -> bool {
    txid.len() == 64 && txid.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "9996f5ad442be27bdc8c05ba32c0837185a36626fd8bc1c9cd0a4a2576277ec2";

    #[test]
    fn test_label_includes_txid_index_and_script() {
        let utxo = UtxoRef::new(TXID, 1);
        assert_eq!(utxo.label("v0_p2wpkh"), format!("{}:1 (v0_p2wpkh)", TXID));
        assert_eq!(utxo.short_label("v0_p2wpkh"), "9996f5ad...:1 (v0_p2wpkh)");
    }

    #[test]
    fn test_short_label_short_txid() {
        let utxo = UtxoRef::new("abc", 0);
        assert_eq!(utxo.short_label("p2pkh"), "abc...:0 (p2pkh)");
    }

    #[test]
    fn test_labels_differ_for_txids_sharing_a_prefix() {
        let a = UtxoRef::new(format!("deadbeef{}", "0".repeat(56)), 0);
        let b = UtxoRef::new(format!("deadbeef{}", "1".repeat(56)), 0);
        assert_eq!(a.short_label("p2pkh"), b.short_label("p2pkh"));
        assert_ne!(a.label("p2pkh"), b.label("p2pkh"));
    }

    #[test]
    fn test_outspends_missing_entry_is_unspent() {
        let outspends = Outspends(vec![Some("ff".repeat(32)), None]);
        assert!(outspends.spender(0).is_some());
        assert!(outspends.spender(1).is_none());
        assert!(outspends.spender(7).is_none());
    }

    #[test]
    fn test_script_type_out_of_range() {
        let tx = TransactionDetails {
            txid: TXID.to_string(),
            outputs: vec![TxOutput {
                index: 0,
                value: 1000,
                script_type: "p2tr".to_string(),
            }],
        };
        assert_eq!(tx.script_type(0).unwrap(), "p2tr");
        assert!(matches!(
            tx.script_type(3),
            Err(ScanError::InvalidIndex { index: 3, .. })
        ));
    }

    #[test]
    fn test_txid_validation() {
        assert!(is_valid_txid(TXID));
        assert!(!is_valid_txid("not-a-txid"));
        assert!(!is_valid_txid(&TXID[..63]));
    }
}
