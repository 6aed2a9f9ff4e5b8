// Transaction data structure
//
// Transaction semantics live outside the consensus core; the miner only needs
// an identity and a syntactic-validity predicate.

use crate::core::{hash256, Serializable, TxId};
use super::serialize::{read_u64, read_var_bytes, write_u64, write_var_bytes};
use std::io::{Cursor, Read, Write};

/// Largest payload accepted as syntactically valid
pub const MAX_TX_PAYLOAD: usize = 4096;

/// Opaque transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    /// Application payload
    pub payload: Vec<u8>,
    /// Fee offered to the including miner
    pub fee: u64,
}

impl Transaction {
    pub fn new(payload: Vec<u8>, fee: u64) -> Self {
        Self { payload, fee }
    }

    /// Transaction ID (double SHA256 of the encoding)
    pub fn txid(&self) -> TxId {
        TxId(hash256(&self.serialize()))
    }

    /// Structural check only: non-empty, bounded payload
    pub fn is_syntactically_valid(&self) -> bool {
        !self.payload.is_empty() && self.payload.len() <= MAX_TX_PAYLOAD
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write_var_bytes(writer, &self.payload)?;
        write_u64(writer, self.fee)
    }

    pub(crate) fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, String> {
        let payload = read_var_bytes(reader).map_err(|e| e.to_string())?;
        let fee = read_u64(reader).map_err(|e| e.to_string())?;
        Ok(Self { payload, fee })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 12);
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        Self::read_from(&mut cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txid_is_content_derived() {
        let a = Transaction::new(b"pay alice".to_vec(), 10);
        let b = Transaction::new(b"pay alice".to_vec(), 10);
        let c = Transaction::new(b"pay alice".to_vec(), 11);

        assert_eq!(a.txid(), b.txid());
        assert_ne!(a.txid(), c.txid());
    }

    #[test]
    fn test_syntactic_validity() {
        assert!(Transaction::new(vec![1], 0).is_syntactically_valid());
        assert!(!Transaction::new(vec![], 0).is_syntactically_valid());
        assert!(!Transaction::new(vec![0; MAX_TX_PAYLOAD + 1], 0).is_syntactically_valid());
    }

    #[test]
    fn test_deserialize_truncated() {
        let tx = Transaction::new(b"data".to_vec(), 5);
        let bytes = tx.serialize();
        assert_eq!(Transaction::deserialize(&bytes).unwrap(), tx);
        assert!(Transaction::deserialize(&bytes[..bytes.len() - 1]).is_err());
    }
}
