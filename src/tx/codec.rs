//! Native binary transaction format
//!
//! Layout (little-endian):
//! version | [0x00 0x01 if witness] | inputs | outputs | [witnesses] | lock_time
//!
//! Outputs carry a token id after the script (VARINT), since every
//! transaction we produce is version 4.

use crate::error::{Error, Result};

use super::{from_satoshis, to_satoshis, Script, Transaction, TxIn, TxOut, Txid};

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// Serialize a transaction, optionally including witness data
pub fn encode(tx: &Transaction, include_witness: bool) -> Result<Vec<u8>> {
    let mut w = Writer::default();
    w.u32(tx.version);
    if include_witness {
        w.u8(SEGWIT_MARKER);
        w.u8(SEGWIT_FLAG);
    }

    w.compact_size(tx.inputs.len() as u64);
    for input in &tx.inputs {
        w.bytes(input.txid.as_internal_bytes());
        w.u32(input.vout);
        w.var_bytes(input.script_sig.as_bytes());
        w.u32(input.sequence);
    }

    w.compact_size(tx.outputs.len() as u64);
    for output in &tx.outputs {
        w.i64(to_satoshis(output.value)?);
        w.var_bytes(output.script.as_bytes());
        w.varint(output.token_id as u64);
    }

    if include_witness {
        for input in &tx.inputs {
            w.compact_size(input.witness.len() as u64);
            for item in &input.witness {
                w.var_bytes(item);
            }
        }
    }

    w.u32(tx.lock_time);
    Ok(w.into_inner())
}

/// Parse a serialized transaction
pub fn decode(data: &[u8]) -> Result<Transaction> {
    let mut r = Reader::new(data);
    let version = r.u32()?;

    let segwit = r.peek(0) == Some(SEGWIT_MARKER) && r.peek(1) == Some(SEGWIT_FLAG);
    if segwit {
        r.skip(2)?;
    }

    let input_count = r.compact_size()? as usize;
    let mut inputs = Vec::with_capacity(input_count.min(1024));
    for _ in 0..input_count {
        let txid = Txid::from_internal_bytes(r.array::<32>()?);
        let vout = r.u32()?;
        let script_sig = Script::new(r.var_bytes()?);
        let sequence = r.u32()?;
        inputs.push(TxIn {
            txid,
            vout,
            script_sig,
            sequence,
            witness: Vec::new(),
        });
    }

    let output_count = r.compact_size()? as usize;
    let mut outputs = Vec::with_capacity(output_count.min(1024));
    for _ in 0..output_count {
        let value = from_satoshis(r.i64()?);
        let script = Script::new(r.var_bytes()?);
        let token_id = u32::try_from(r.varint()?)
            .map_err(|_| Error::Decode("token id out of range".to_string()))?;
        outputs.push(TxOut {
            value,
            script,
            token_id,
        });
    }

    if segwit {
        for input in inputs.iter_mut() {
            let items = r.compact_size()? as usize;
            for _ in 0..items {
                input.witness.push(r.var_bytes()?);
            }
        }
    }

    let lock_time = r.u32()?;
    if !r.is_empty() {
        return Err(Error::Decode(format!(
            "{} trailing bytes after transaction",
            r.remaining()
        )));
    }

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time,
    })
}

/// Little-endian byte writer
#[derive(Default)]
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// CompactSize length prefix
    pub fn compact_size(&mut self, n: u64) {
        match n {
            0..=0xfc => self.buf.push(n as u8),
            0xfd..=0xffff => {
                self.buf.push(0xfd);
                self.buf.extend_from_slice(&(n as u16).to_le_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.buf.push(0xfe);
                self.buf.extend_from_slice(&(n as u32).to_le_bytes());
            }
            _ => {
                self.buf.push(0xff);
                self.buf.extend_from_slice(&n.to_le_bytes());
            }
        }
    }

    /// MSB base-128 VARINT (token and pool ids)
    pub fn varint(&mut self, mut n: u64) {
        let mut tmp = [0u8; 10];
        let mut len = 0;
        loop {
            tmp[len] = (n & 0x7f) as u8 | if len > 0 { 0x80 } else { 0x00 };
            if n <= 0x7f {
                break;
            }
            n = (n >> 7) - 1;
            len += 1;
        }
        for i in (0..=len).rev() {
            self.buf.push(tmp[i]);
        }
    }

    pub fn var_bytes(&mut self, v: &[u8]) {
        self.compact_size(v.len() as u64);
        self.bytes(v);
    }
}

/// Cursor over a byte slice
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Decode(format!(
                "unexpected end of data: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array::<4>()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array::<8>()?))
    }

    pub fn compact_size(&mut self) -> Result<u64> {
        Ok(match self.u8()? {
            0xfd => u16::from_le_bytes(self.array::<2>()?) as u64,
            0xfe => u32::from_le_bytes(self.array::<4>()?) as u64,
            0xff => u64::from_le_bytes(self.array::<8>()?),
            n => n as u64,
        })
    }

    pub fn varint(&mut self) -> Result<u64> {
        let mut n: u64 = 0;
        loop {
            let byte = self.u8()?;
            if n > (u64::MAX >> 7) {
                return Err(Error::Decode("VARINT overflow".to_string()));
            }
            n = (n << 7) | (byte & 0x7f) as u64;
            if byte & 0x80 != 0 {
                n = n
                    .checked_add(1)
                    .ok_or_else(|| Error::Decode("VARINT overflow".to_string()))?;
            } else {
                return Ok(n);
            }
        }
    }

    pub fn var_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.compact_size()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}
