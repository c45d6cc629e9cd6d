//! Ledger operation payloads
//!
//! A ledger operation rides in the data output as
//! `OP_RETURN <"DfTx" | type byte | body>`. Amounts in bodies are 8-decimal
//! fixed point `i64`; scripts are length-prefixed.

use rust_decimal::Decimal;
use std::fmt;

use crate::error::{Error, Result};
use crate::tx::codec::{Reader, Writer};
use crate::tx::{from_satoshis, to_satoshis, OperationPayload, Script, Txid, COIN};

/// Payload prefix
pub const DFTX_MAGIC: &[u8; 4] = b"DfTx";

/// Default swap price ceiling (effectively unbounded)
pub const MAX_PRICE_UNBOUNDED: i64 = 999_999_999;

/// Operation type, by its wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DfTxKind {
    DepositToVault,
    WithdrawFromVault,
    TakeLoan,
    PaybackLoan,
    PoolSwap,
    CompositeSwap,
    AddLiquidity,
    RemoveLiquidity,
    UtxosToAccount,
    AccountToAccount,
}

impl DfTxKind {
    pub fn code(&self) -> u8 {
        match self {
            DfTxKind::DepositToVault => b'S',
            DfTxKind::WithdrawFromVault => b'J',
            DfTxKind::TakeLoan => b'X',
            DfTxKind::PaybackLoan => b'H',
            DfTxKind::PoolSwap => b's',
            DfTxKind::CompositeSwap => b'i',
            DfTxKind::AddLiquidity => b'l',
            DfTxKind::RemoveLiquidity => b'r',
            DfTxKind::UtxosToAccount => b'U',
            DfTxKind::AccountToAccount => b'B',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'S' => DfTxKind::DepositToVault,
            b'J' => DfTxKind::WithdrawFromVault,
            b'X' => DfTxKind::TakeLoan,
            b'H' => DfTxKind::PaybackLoan,
            b's' => DfTxKind::PoolSwap,
            b'i' => DfTxKind::CompositeSwap,
            b'l' => DfTxKind::AddLiquidity,
            b'r' => DfTxKind::RemoveLiquidity,
            b'U' => DfTxKind::UtxosToAccount,
            b'B' => DfTxKind::AccountToAccount,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            DfTxKind::DepositToVault => "DepositToVault",
            DfTxKind::WithdrawFromVault => "WithdrawFromVault",
            DfTxKind::TakeLoan => "TakeLoan",
            DfTxKind::PaybackLoan => "PaybackLoan",
            DfTxKind::PoolSwap => "PoolSwap",
            DfTxKind::CompositeSwap => "CompositeSwap",
            DfTxKind::AddLiquidity => "AddLiquidity",
            DfTxKind::RemoveLiquidity => "RemoveLiquidity",
            DfTxKind::UtxosToAccount => "UtxosToAccount",
            DfTxKind::AccountToAccount => "AccountToAccount",
        }
    }
}

impl fmt::Display for DfTxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code() as char)
    }
}

/// Amount of a single token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAmount {
    pub token: u32,
    pub amount: Decimal,
}

impl TokenAmount {
    pub fn new(token: u32, amount: Decimal) -> Self {
        Self { token, amount }
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}@{}", self.amount, self.token)
    }
}

/// Token balances credited to or debited from one script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBalances {
    pub script: Script,
    pub balances: Vec<TokenAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSwap {
    pub from_script: Script,
    pub from_token: u32,
    pub from_amount: Decimal,
    pub to_script: Script,
    pub to_token: u32,
    pub max_price: Decimal,
}

/// Decoded ledger operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfTx {
    DepositToVault {
        vault_id: Txid,
        from: Script,
        amount: TokenAmount,
    },
    WithdrawFromVault {
        vault_id: Txid,
        to: Script,
        amount: TokenAmount,
    },
    TakeLoan {
        vault_id: Txid,
        to: Script,
        amounts: Vec<TokenAmount>,
    },
    PaybackLoan {
        vault_id: Txid,
        from: Script,
        amounts: Vec<TokenAmount>,
    },
    PoolSwap(PoolSwap),
    CompositeSwap {
        swap: PoolSwap,
        pools: Vec<u32>,
    },
    AddLiquidity {
        from: Vec<ScriptBalances>,
        share_address: Script,
    },
    RemoveLiquidity {
        script: Script,
        pool_id: u32,
        amount: Decimal,
    },
    UtxosToAccount {
        to: Vec<ScriptBalances>,
    },
    AccountToAccount {
        from: Script,
        to: Vec<ScriptBalances>,
    },
}

impl DfTx {
    pub fn kind(&self) -> DfTxKind {
        match self {
            DfTx::DepositToVault { .. } => DfTxKind::DepositToVault,
            DfTx::WithdrawFromVault { .. } => DfTxKind::WithdrawFromVault,
            DfTx::TakeLoan { .. } => DfTxKind::TakeLoan,
            DfTx::PaybackLoan { .. } => DfTxKind::PaybackLoan,
            DfTx::PoolSwap(_) => DfTxKind::PoolSwap,
            DfTx::CompositeSwap { .. } => DfTxKind::CompositeSwap,
            DfTx::AddLiquidity { .. } => DfTxKind::AddLiquidity,
            DfTx::RemoveLiquidity { .. } => DfTxKind::RemoveLiquidity,
            DfTx::UtxosToAccount { .. } => DfTxKind::UtxosToAccount,
            DfTx::AccountToAccount { .. } => DfTxKind::AccountToAccount,
        }
    }

    /// Encode into the bytes carried by the data output
    pub fn to_payload(&self) -> Result<OperationPayload> {
        let mut w = Writer::default();
        w.bytes(DFTX_MAGIC);
        w.u8(self.kind().code());

        match self {
            DfTx::DepositToVault {
                vault_id,
                from: script,
                amount,
            }
            | DfTx::WithdrawFromVault {
                vault_id,
                to: script,
                amount,
            } => {
                w.bytes(vault_id.as_internal_bytes());
                w.var_bytes(script.as_bytes());
                w.varint(amount.token as u64);
                w.i64(to_satoshis(amount.amount)?);
            }
            DfTx::TakeLoan {
                vault_id,
                to: script,
                amounts,
            }
            | DfTx::PaybackLoan {
                vault_id,
                from: script,
                amounts,
            } => {
                w.bytes(vault_id.as_internal_bytes());
                w.var_bytes(script.as_bytes());
                write_balances(&mut w, amounts)?;
            }
            DfTx::PoolSwap(swap) => write_pool_swap(&mut w, swap)?,
            DfTx::CompositeSwap { swap, pools } => {
                write_pool_swap(&mut w, swap)?;
                w.compact_size(pools.len() as u64);
                for pool in pools {
                    w.varint(*pool as u64);
                }
            }
            DfTx::AddLiquidity {
                from,
                share_address,
            } => {
                write_script_balances(&mut w, from)?;
                w.var_bytes(share_address.as_bytes());
            }
            DfTx::RemoveLiquidity {
                script,
                pool_id,
                amount,
            } => {
                w.var_bytes(script.as_bytes());
                w.varint(*pool_id as u64);
                w.i64(to_satoshis(*amount)?);
            }
            DfTx::UtxosToAccount { to } => write_script_balances(&mut w, to)?,
            DfTx::AccountToAccount { from, to } => {
                w.var_bytes(from.as_bytes());
                write_script_balances(&mut w, to)?;
            }
        }

        Ok(OperationPayload::new(w.into_inner()))
    }

    /// Parse the bytes of a data output (magic included)
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let magic: [u8; 4] = r.array()?;
        if &magic != DFTX_MAGIC {
            return Err(Error::Decode("missing DfTx marker".to_string()));
        }
        let code = r.u8()?;
        let kind = DfTxKind::from_code(code)
            .ok_or_else(|| Error::Decode(format!("unsupported operation type {:#04x}", code)))?;

        let dftx = match kind {
            DfTxKind::DepositToVault => DfTx::DepositToVault {
                vault_id: Txid::from_internal_bytes(r.array()?),
                from: read_script(&mut r)?,
                amount: read_token_amount(&mut r)?,
            },
            DfTxKind::WithdrawFromVault => DfTx::WithdrawFromVault {
                vault_id: Txid::from_internal_bytes(r.array()?),
                to: read_script(&mut r)?,
                amount: read_token_amount(&mut r)?,
            },
            DfTxKind::TakeLoan => DfTx::TakeLoan {
                vault_id: Txid::from_internal_bytes(r.array()?),
                to: read_script(&mut r)?,
                amounts: read_balances(&mut r)?,
            },
            DfTxKind::PaybackLoan => DfTx::PaybackLoan {
                vault_id: Txid::from_internal_bytes(r.array()?),
                from: read_script(&mut r)?,
                amounts: read_balances(&mut r)?,
            },
            DfTxKind::PoolSwap => DfTx::PoolSwap(read_pool_swap(&mut r)?),
            DfTxKind::CompositeSwap => {
                let swap = read_pool_swap(&mut r)?;
                let count = r.compact_size()?;
                let pools = (0..count)
                    .map(|_| read_u32_varint(&mut r))
                    .collect::<Result<Vec<_>>>()?;
                DfTx::CompositeSwap { swap, pools }
            }
            DfTxKind::AddLiquidity => DfTx::AddLiquidity {
                from: read_script_balances(&mut r)?,
                share_address: read_script(&mut r)?,
            },
            DfTxKind::RemoveLiquidity => DfTx::RemoveLiquidity {
                script: read_script(&mut r)?,
                pool_id: read_u32_varint(&mut r)?,
                amount: from_satoshis(r.i64()?),
            },
            DfTxKind::UtxosToAccount => DfTx::UtxosToAccount {
                to: read_script_balances(&mut r)?,
            },
            DfTxKind::AccountToAccount => DfTx::AccountToAccount {
                from: read_script(&mut r)?,
                to: read_script_balances(&mut r)?,
            },
        };

        if !r.is_empty() {
            return Err(Error::Decode(format!(
                "{} trailing bytes after {}",
                r.remaining(),
                kind.name()
            )));
        }
        Ok(dftx)
    }
}

/// Operation type carried by a data output script, if any
pub fn describe(script: &Script) -> Option<DfTxKind> {
    let data = script.op_return_data()?;
    if data.len() < 5 || &data[..4] != DFTX_MAGIC {
        return None;
    }
    DfTxKind::from_code(data[4])
}

fn write_balances(w: &mut Writer, balances: &[TokenAmount]) -> Result<()> {
    w.compact_size(balances.len() as u64);
    for balance in balances {
        w.u32(balance.token);
        w.i64(to_satoshis(balance.amount)?);
    }
    Ok(())
}

fn write_script_balances(w: &mut Writer, entries: &[ScriptBalances]) -> Result<()> {
    w.compact_size(entries.len() as u64);
    for entry in entries {
        w.var_bytes(entry.script.as_bytes());
        write_balances(w, &entry.balances)?;
    }
    Ok(())
}

fn write_pool_swap(w: &mut Writer, swap: &PoolSwap) -> Result<()> {
    w.var_bytes(swap.from_script.as_bytes());
    w.varint(swap.from_token as u64);
    w.i64(to_satoshis(swap.from_amount)?);
    w.var_bytes(swap.to_script.as_bytes());
    w.varint(swap.to_token as u64);

    // Price is split into whole and 8-decimal fractional parts
    let price = to_satoshis(swap.max_price)?;
    w.i64(price / COIN);
    w.i64(price % COIN);
    Ok(())
}

fn read_script(r: &mut Reader<'_>) -> Result<Script> {
    Ok(Script::new(r.var_bytes()?))
}

fn read_u32_varint(r: &mut Reader<'_>) -> Result<u32> {
    let value = r.varint()?;
    u32::try_from(value).map_err(|_| Error::Decode(format!("id {} out of range", value)))
}

fn read_token_amount(r: &mut Reader<'_>) -> Result<TokenAmount> {
    Ok(TokenAmount {
        token: read_u32_varint(r)?,
        amount: from_satoshis(r.i64()?),
    })
}

fn read_balances(r: &mut Reader<'_>) -> Result<Vec<TokenAmount>> {
    let count = r.compact_size()?;
    (0..count)
        .map(|_| -> Result<TokenAmount> {
            Ok(TokenAmount {
                token: r.u32()?,
                amount: from_satoshis(r.i64()?),
            })
        })
        .collect()
}

fn read_script_balances(r: &mut Reader<'_>) -> Result<Vec<ScriptBalances>> {
    let count = r.compact_size()?;
    (0..count)
        .map(|_| -> Result<ScriptBalances> {
            Ok(ScriptBalances {
                script: read_script(r)?,
                balances: read_balances(r)?,
            })
        })
        .collect()
}

fn read_pool_swap(r: &mut Reader<'_>) -> Result<PoolSwap> {
    let from_script = read_script(r)?;
    let from_token = read_u32_varint(r)?;
    let from_amount = from_satoshis(r.i64()?);
    let to_script = read_script(r)?;
    let to_token = read_u32_varint(r)?;
    let max_price = read_max_price(r)?;
    Ok(PoolSwap {
        from_script,
        from_token,
        from_amount,
        to_script,
        to_token,
        max_price,
    })
}

/// Max price travels as an integer part and an 8-decimal fraction
fn read_max_price(r: &mut Reader<'_>) -> Result<Decimal> {
    let integer = r.i64()?;
    let fraction = r.i64()?;
    if !(0..COIN).contains(&fraction) {
        return Err(Error::Decode(format!("max price fraction {} out of range", fraction)));
    }
    integer
        .checked_mul(COIN)
        .and_then(|price| price.checked_add(fraction))
        .map(from_satoshis)
        .ok_or_else(|| Error::Decode(format!("max price {}.{:08} overflows", integer, fraction)))
}
