//! UTXO Transaction Builder
//!
//! Builds unsigned legacy transactions for native and Omni withdrawals.
//! Inputs come from the coin selector; the fee is sized from the unsigned
//! serialization plus a per-input signature allowance.

use bitcoin::{
    absolute::LockTime, transaction::Version, Address, Amount, Network, OutPoint, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use std::str::FromStr;

use super::omni::SimpleSend;
use super::selector::{select, SelectionParams};
use crate::chain::{ChainError, ChainResult};
use crate::types::UnspentOutput;

/// Bytes added per input once signed (DER signature + sighash byte + compressed key, with pushes)
pub const SIG_ALLOWANCE: usize = 107;

/// Outpoint + script length + sequence of an unsigned input
const INPUT_BASE_SIZE: usize = 41;

/// Value of the Omni reference output and the change dust floor
pub const DUST_LIMIT: u64 = 546;

/// What the transaction moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payment {
    /// Satoshis to the destination
    Native { amount: u64 },
    /// Omni property units; the destination also receives a dust reference output
    Omni { property_id: u32, amount: u64 },
}

/// Inputs to one build
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub payment: Payment,
    pub candidates: &'a [UnspentOutput],
    pub tip_height: u64,
    /// sat/vB
    pub fee_rate: f64,
}

/// Unsigned transaction ready for signing
#[derive(Debug, Clone)]
pub struct BuiltTx {
    pub tx: Transaction,
    /// Inputs being spent, in transaction order
    pub selected: Vec<UnspentOutput>,
    /// Fee in satoshis, including any folded dust change
    pub fee: u64,
    /// Sum of input values
    pub vin_amount: u64,
    /// Change returned to the source (0 when folded into the fee)
    pub change: u64,
}

impl BuiltTx {
    pub fn to_hex(&self) -> String {
        bitcoin::consensus::encode::serialize_hex(&self.tx)
    }
}

/// Builds unsigned transactions
#[derive(Debug, Clone)]
pub struct UtxoTxBuilder {
    network: Network,
    params: SelectionParams,
}

impl UtxoTxBuilder {
    pub fn new(network: Network, params: SelectionParams) -> Self {
        Self { network, params }
    }

    /// Validate a Bitcoin address for this network
    pub fn validate_address(&self, address: &str) -> ChainResult<Address> {
        Address::from_str(address)
            .map_err(|e| ChainError::AddressDecode(format!("{}: {}", address, e)))?
            .require_network(self.network)
            .map_err(|e| ChainError::AddressDecode(format!("{}: {}", address, e)))
    }

    /// Estimate the fee for a transaction shaped like `tx` once signed
    pub fn estimate_fee(&self, tx: &Transaction, fee_rate: f64) -> u64 {
        let size = bitcoin::consensus::encode::serialize(tx).len() + tx.input.len() * SIG_ALLOWANCE;
        (size as f64 * fee_rate.max(1.0)).ceil() as u64
    }

    pub fn build(&self, request: &BuildRequest<'_>) -> ChainResult<BuiltTx> {
        let from = self.validate_address(request.from)?;
        let to = self.validate_address(request.to)?;

        let (spend, marker) = match request.payment {
            Payment::Native { amount } => {
                if amount < DUST_LIMIT {
                    return Err(ChainError::InvalidAmount(format!(
                        "{} sats is below the dust limit",
                        amount
                    )));
                }
                (amount, None)
            }
            Payment::Omni { property_id, amount } => {
                if amount == 0 {
                    return Err(ChainError::InvalidAmount("zero Omni amount".to_string()));
                }
                (DUST_LIMIT, Some(SimpleSend::new(property_id, amount).marker_script()?))
            }
        };

        let first = select(spend as u128, request.candidates, request.tip_height, &self.params)?;
        let mut selected = first.selected;
        let mut remainder = first.remainder;

        loop {
            let vin_amount = sum_sats(&selected)?;
            let draft = self.assemble(&selected, &from, &to, spend, marker.as_ref(), Some(0))?;
            let fee = self.estimate_fee(&draft, request.fee_rate);
            let required = spend + fee;

            if vin_amount >= required {
                let change = vin_amount - required;
                let (tx, fee, change) = if change >= DUST_LIMIT {
                    let tx = self.assemble(&selected, &from, &to, spend, marker.as_ref(), Some(change))?;
                    (tx, fee, change)
                } else {
                    let tx = self.assemble(&selected, &from, &to, spend, marker.as_ref(), None)?;
                    (tx, vin_amount - spend, 0)
                };

                return Ok(BuiltTx {
                    tx,
                    selected,
                    fee,
                    vin_amount,
                    change,
                });
            }

            let slots = self.params.max_inputs.saturating_sub(selected.len());
            if slots == 0 || remainder.is_empty() {
                return Err(ChainError::InsufficientFunds {
                    required: required.to_string(),
                    available: vin_amount.to_string(),
                });
            }

            // Top up from the remainder: the gap plus the cost of one more input.
            // Each extra coin raises the fee, so the gap is re-measured next round.
            let per_input = ((INPUT_BASE_SIZE + SIG_ALLOWANCE) as f64 * request.fee_rate.max(1.0)).ceil() as u64;
            let gap = required - vin_amount + per_input;
            let params = SelectionParams {
                max_inputs: slots,
                ..self.params
            };
            let extra = select(gap as u128, &remainder, request.tip_height, &params).map_err(|_| {
                ChainError::InsufficientFunds {
                    required: required.to_string(),
                    available: (vin_amount as u128 + remainder.iter().map(|u| u.amount).sum::<u128>())
                        .to_string(),
                }
            })?;

            selected.extend(extra.selected);
            remainder = extra.remainder;
        }
    }

    fn assemble(
        &self,
        selected: &[UnspentOutput],
        from: &Address,
        to: &Address,
        spend: u64,
        marker: Option<&ScriptBuf>,
        change: Option<u64>,
    ) -> ChainResult<Transaction> {
        let input = selected
            .iter()
            .map(|utxo| {
                let txid = Txid::from_str(&utxo.txid)
                    .map_err(|e| ChainError::InvalidTransaction(format!("txid {}: {}", utxo.txid, e)))?;

                Ok(TxIn {
                    previous_output: OutPoint { txid, vout: utxo.vout },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
            })
            .collect::<ChainResult<Vec<TxIn>>>()?;

        let mut output = Vec::with_capacity(3);
        if let Some(marker) = marker {
            output.push(TxOut {
                value: Amount::ZERO,
                script_pubkey: marker.clone(),
            });
        }
        output.push(TxOut {
            value: Amount::from_sat(spend),
            script_pubkey: to.script_pubkey(),
        });
        if let Some(change) = change {
            output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: from.script_pubkey(),
            });
        }

        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        })
    }
}

fn sum_sats(utxos: &[UnspentOutput]) -> ChainResult<u64> {
    let total: u128 = utxos.iter().map(|u| u.amount).sum();
    u64::try_from(total).map_err(|_| ChainError::InvalidAmount(format!("{} exceeds satoshi range", total)))
}
