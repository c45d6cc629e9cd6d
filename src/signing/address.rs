//! Address decoding
//!
//! Turns a configured address into the locking script the engine pays
//! change to. Supports native segwit (bech32) and legacy base58check
//! P2PKH / P2SH addresses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::tx::{push_data, Script};

const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// Chain the addresses belong to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn bech32_hrp(&self) -> &'static str {
        match self {
            Network::Mainnet => "df",
            Network::Testnet => "tf",
            Network::Regtest => "bcrt",
        }
    }

    fn pubkey_hash_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 0x12,
            Network::Testnet => 0x0f,
            Network::Regtest => 0x6f,
        }
    }

    fn script_hash_prefix(&self) -> u8 {
        match self {
            Network::Mainnet => 0x5a,
            Network::Testnet => 0x80,
            Network::Regtest => 0xc4,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(Error::Config(format!("Unknown network: {}", other))),
        }
    }
}

/// Locking script of `address` on `network`
pub fn decode_address(address: &str, network: Network) -> Result<Script> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::InvalidAddress("empty address".to_string()));
    }

    let segwit_prefix = format!("{}1", network.bech32_hrp());
    if address.to_lowercase().starts_with(&segwit_prefix) {
        decode_segwit(address, network)
    } else {
        decode_base58(address, network)
    }
}

/// Locking script of an address this engine may spend from
///
/// Only P2WPKH: fees are estimated for P2WPKH witnesses, and a legacy
/// scriptSig would make the signed transaction larger than estimated.
/// Any address is still a valid payment destination through
/// `decode_address`.
pub fn decode_spending_address(address: &str, network: Network) -> Result<Script> {
    let script = decode_address(address, network)?;
    if !script.is_p2wpkh() {
        return Err(Error::InvalidAddress(format!(
            "{}: only native segwit (P2WPKH) addresses can fund transactions",
            address.trim()
        )));
    }
    Ok(script)
}

fn decode_segwit(address: &str, network: Network) -> Result<Script> {
    let (hrp, version, program) = bech32::segwit::decode(address)
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;

    if hrp.to_string().to_lowercase() != network.bech32_hrp() {
        return Err(Error::InvalidAddress(format!(
            "{} is not a {} address",
            address, network
        )));
    }

    let version = version.to_u8();
    let mut script = Vec::with_capacity(program.len() + 2);
    script.push(if version == 0 { OP_0 } else { OP_1 + version - 1 });
    push_data(&mut script, &program);
    Ok(Script::new(script))
}

fn decode_base58(address: &str, network: Network) -> Result<Script> {
    let payload = bs58::decode(address)
        .with_check(None)
        .into_vec()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;

    if payload.len() != 21 {
        return Err(Error::InvalidAddress(format!(
            "{}: unexpected payload length {}",
            address,
            payload.len()
        )));
    }

    let (version, hash) = (payload[0], &payload[1..]);
    let mut script = Vec::with_capacity(25);
    if version == network.pubkey_hash_prefix() {
        script.extend_from_slice(&[OP_DUP, OP_HASH160, 0x14]);
        script.extend_from_slice(hash);
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    } else if version == network.script_hash_prefix() {
        script.extend_from_slice(&[OP_HASH160, 0x14]);
        script.extend_from_slice(hash);
        script.push(OP_EQUAL);
    } else {
        return Err(Error::InvalidAddress(format!(
            "{}: version byte {:#04x} is not valid on {}",
            address, version, network
        )));
    }
    Ok(Script::new(script))
}

#[cfg(test)]
pub(crate) fn segwit_address(network: Network, program: &[u8; 20]) -> String {
    let hrp = bech32::Hrp::parse(network.bech32_hrp()).unwrap();
    bech32::segwit::encode_v0(hrp, program).unwrap()
}
