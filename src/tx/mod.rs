//! Transaction model for the UTXO ledger
//!
//! Provides the transaction types the engine builds, plus:
//! - `selector` - spendable output gathering
//! - `fee` - size-based fee estimation
//! - `builder` - inputs + data output + change output assembly
//! - `chain_link` - change output to next input extraction
//! - `pool` - owned prevout arena for re-signing
//! - `codec` - native binary encoding and txid computation

pub mod builder;
pub mod chain_link;
pub mod codec;
pub mod fee;
pub mod pool;
pub mod selector;

pub use builder::{BuiltTransaction, TransactionBuilder};
pub use chain_link::{next_input, PrevoutLink};
pub use fee::{FeeEstimator, SizeFeeEstimator};
pub use pool::PrevoutPool;
pub use selector::{SelectionPolicy, UtxoSelector};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Transaction version carrying token ids on outputs
pub const TRANSACTION_VERSION: u32 = 4;

/// Input sequence, final
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Satoshis per whole coin (amounts carry 8 decimal places)
pub const COIN: i64 = 100_000_000;

/// Native asset token id
pub const NATIVE_TOKEN: u32 = 0;

/// OP_RETURN opcode
pub const OP_RETURN: u8 = 0x6a;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;

/// Convert a decimal amount to satoshis
///
/// Fails on negative values and on precision beyond 8 decimal places.
pub fn to_satoshis(value: Decimal) -> Result<i64> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(Error::InvalidAmount(format!("negative amount {}", value)));
    }
    let scaled = value * Decimal::from(COIN);
    if scaled.fract() != Decimal::ZERO {
        return Err(Error::InvalidAmount(format!(
            "{} has more than 8 decimal places",
            value
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| Error::InvalidAmount(format!("{} out of range", value)))
}

/// Convert satoshis to a decimal amount
pub fn from_satoshis(satoshis: i64) -> Decimal {
    Decimal::new(satoshis, 8).normalize()
}

/// Transaction id (double SHA-256), stored in internal byte order
///
/// Displayed and parsed byte-reversed, like every UTXO chain explorer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Txid([u8; 32]);

impl Txid {
    pub fn from_internal_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_internal_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Double SHA-256 of the given serialization
    pub fn hash(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&second);
        Self(bytes)
    }
}

impl FromStr for Txid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let decoded = hex::decode(s)?;
        let mut bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|_| Error::Decode(format!("txid must be 32 bytes: {}", s)))?;
        bytes.reverse();
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Txid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Txid> for String {
    fn from(txid: Txid) -> Self {
        txid.to_string()
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        write!(f, "{}", hex::encode(reversed))
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self)
    }
}

/// Opaque locking/unlocking byte program
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(hex::decode(s)?))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `OP_0 <20-byte key hash>`, the only script the fee estimate costs correctly
    pub fn is_p2wpkh(&self) -> bool {
        self.0.len() == 22 && self.0[0] == 0x00 && self.0[1] == 0x14
    }

    /// `OP_RETURN <data>` carrying an application payload
    pub fn op_return(data: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + 6);
        bytes.push(OP_RETURN);
        push_data(&mut bytes, data);
        Self(bytes)
    }

    /// Data pushed by an `OP_RETURN <data>` script
    pub fn op_return_data(&self) -> Option<&[u8]> {
        let (&first, rest) = self.0.split_first()?;
        if first != OP_RETURN || rest.is_empty() {
            return None;
        }
        let (len, offset) = match rest[0] {
            n @ 0x01..=0x4b => (n as usize, 1),
            OP_PUSHDATA1 => (*rest.get(1)? as usize, 2),
            OP_PUSHDATA2 => (u16::from_le_bytes([*rest.get(1)?, *rest.get(2)?]) as usize, 3),
            OP_PUSHDATA4 => {
                let len = u32::from_le_bytes(rest.get(1..5)?.try_into().ok()?);
                (len as usize, 5)
            }
            _ => return None,
        };
        rest.get(offset..offset + len)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Append a minimal push of `data` to a script
pub(crate) fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        len @ 0..=0x4b => script.push(len as u8),
        len @ 0x4c..=0xff => {
            script.push(OP_PUSHDATA1);
            script.push(len as u8);
        }
        len @ 0x100..=0xffff => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
        }
        len => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
        }
    }
    script.extend_from_slice(data);
}

/// Pre-encoded application instruction carried by the data output
///
/// The engine never looks inside; it only needs the bytes for the
/// `OP_RETURN` script and their length for fee purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPayload(Vec<u8>);

impl OperationPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Locking script of the data output
    pub fn data_script(&self) -> Script {
        Script::op_return(&self.0)
    }
}

/// Unspent output eligible as a future input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableOutput {
    pub txid: Txid,
    pub vout: u32,
    pub value: Decimal,
    pub script: Script,
    pub token_id: u32,
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub txid: Txid,
    pub vout: u32,
    /// Empty until signed
    pub script_sig: Script,
    pub sequence: u32,
    /// Empty until signed
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// Unsigned input spending `output`
    pub fn spending(output: &SpendableOutput) -> Self {
        Self {
            txid: output.txid,
            vout: output.vout,
            script_sig: Script::default(),
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: Decimal,
    pub script: Script,
    pub token_id: u32,
}

/// Transaction: data output first, change output second
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Whether any input already carries witness data
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Id over the non-witness serialization
    pub fn txid(&self) -> Result<Txid> {
        Ok(Txid::hash(&codec::encode(self, false)?))
    }

    /// Full serialization (with witness when signed)
    pub fn serialize(&self) -> Result<Vec<u8>> {
        codec::encode(self, self.has_witness())
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.serialize()?))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        codec::decode(&hex::decode(s.trim())?)
    }

    pub fn total_output_value(&self) -> Decimal {
        self.outputs.iter().map(|output| output.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satoshi_conversion() {
        assert_eq!(to_satoshis(Decimal::new(1, 0)).unwrap(), COIN);
        assert_eq!(to_satoshis(Decimal::new(1, 8)).unwrap(), 1);
        assert_eq!(from_satoshis(250_000_000), Decimal::new(25, 1));
        assert!(to_satoshis(Decimal::new(1, 9)).is_err());
        assert!(to_satoshis(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn test_txid_display_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let txid = Txid::from_internal_bytes(bytes);
        let shown = txid.to_string();
        assert!(shown.ends_with("ab"));
        assert_eq!(shown.parse::<Txid>().unwrap(), txid);
    }

    #[test]
    fn test_txid_rejects_wrong_length() {
        assert!("abcd".parse::<Txid>().is_err());
        assert!("zz".parse::<Txid>().is_err());
    }

    #[test]
    fn test_op_return_push_sizes() {
        let short = Script::op_return(&[1, 2, 3]);
        assert_eq!(short.as_bytes(), &[OP_RETURN, 3, 1, 2, 3]);
        assert_eq!(short.op_return_data(), Some(&[1u8, 2, 3][..]));

        let long_payload = vec![7u8; 80];
        let long = Script::op_return(&long_payload);
        assert_eq!(&long.as_bytes()[..3], &[OP_RETURN, OP_PUSHDATA1, 80]);
        assert_eq!(long.op_return_data(), Some(&long_payload[..]));
    }

    #[test]
    fn test_non_op_return_has_no_data() {
        let script = Script::new(vec![0x00, 0x14, 1, 2]);
        assert_eq!(script.op_return_data(), None);
    }
}
