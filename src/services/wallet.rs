//! # Wallet Gateway
//!
//! ## Purpose
//! Deterministic key material and fund movement for the orchestrator:
//! - derives the hot wallet address and one fresh deposit address per
//!   `(room, seat)` from the configured mnemonic, BIP32-style
//!   (`m / purpose' / coin' / account' / change / index`)
//! - derives a per-room signing key used to authenticate spends
//! - builds, signs and submits the aggregate payout and refund transactions
//!
//! Transaction construction is a single-writer critical section per wallet:
//! payouts and refunds from different rooms serialize on one lock so two
//! spends can never select the same hot-wallet UTXO.
//!
//! Address rendering lives behind `render_address` so a full codec for the
//! target network can replace it without touching derivation.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use tokio::sync::Mutex;

use crate::config::Network;
use crate::error::{GameError, GameResult};
use crate::services::chain::{ChainWatcher, PaymentTx, TxOutput};

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

const PURPOSE: u32 = 44;
const COIN_TYPE: u32 = 111111;
const ACCOUNT: u32 = 0;
/// Receive branch; index 0 is the hot wallet.
const BRANCH_RECEIVE: u32 = 0;
/// Per-seat deposit addresses.
const BRANCH_DEPOSIT: u32 = 1;
/// Per-room signing keys.
const BRANCH_ROOM: u32 = 2;

const HARDENED: u32 = 0x8000_0000;

#[derive(Clone)]
struct ExtendedKey {
    key: [u8; 32],
    chain_code: [u8; 32],
}

pub struct WalletGateway {
    account: ExtendedKey,
    network: Network,
    hot_address: String,
    hot_key: [u8; 32],
    /// Serializes spend construction over the shared hot-wallet UTXO set.
    submit_lock: Mutex<()>,
    max_attempts: u32,
    backoff_ms: u64,
}

impl WalletGateway {
    pub fn from_mnemonic(
        mnemonic: &str,
        network: Network,
        max_attempts: u32,
        backoff_ms: u64,
    ) -> GameResult<Self> {
        let mnemonic = bip39::Mnemonic::parse_normalized(mnemonic)
            .map_err(|e| GameError::validation(format!("invalid mnemonic: {e}")))?;
        let seed = mnemonic.to_seed("");

        let master = master_key(&seed);
        let account = derive_path(
            &master,
            &[PURPOSE | HARDENED, COIN_TYPE | HARDENED, ACCOUNT | HARDENED],
        );
        let hot = derive_path(&account, &[BRANCH_RECEIVE, 0]);
        let hot_address = render_address(network, &hot.key);
        Ok(Self {
            account,
            network,
            hot_address,
            hot_key: hot.key,
            submit_lock: Mutex::new(()),
            max_attempts,
            backoff_ms,
        })
    }

    /// Main hot wallet receive address; source of payouts and refunds.
    pub fn hot_wallet_address(&self) -> &str {
        &self.hot_address
    }

    /// Deposit address for seat `k` of a room. The `(room_id, k)` pair maps
    /// into a dedicated branch through a 31-bit hash, so addresses are never
    /// reused across rooms.
    pub fn derive_seat_address(&self, room_id: &str, seat_index: usize) -> String {
        let index = index31(&format!("seat|{room_id}|{seat_index}"));
        let child = derive_path(&self.account, &[BRANCH_DEPOSIT, index]);
        render_address(self.network, &child.key)
    }

    /// Per-room signing key, derived from the room id alone.
    pub fn derive_room_signing_key(&self, room_id: &str) -> [u8; 32] {
        let index = index31(&format!("room|{room_id}"));
        derive_path(&self.account, &[BRANCH_ROOM, index]).key
    }

    /// Submits the aggregate payout: one transaction, one output per payee.
    /// Retries transient node errors with exponential backoff; exhausting the
    /// ceiling is a funds error and no partial payout ever happens.
    pub async fn submit_payout(
        &self,
        chain: &ChainWatcher,
        outputs: &[TxOutput],
    ) -> GameResult<String> {
        self.submit_spend(chain, outputs).await
    }

    /// Submits refunds as a single multi-output transaction reimbursing each
    /// payer the exact amount confirmed at their deposit address.
    pub async fn submit_refunds(
        &self,
        chain: &ChainWatcher,
        outputs: &[TxOutput],
    ) -> GameResult<String> {
        self.submit_spend(chain, outputs).await
    }

    async fn submit_spend(&self, chain: &ChainWatcher, outputs: &[TxOutput]) -> GameResult<String> {
        if outputs.is_empty() {
            return Err(GameError::invariant("spend with no outputs"));
        }
        let _guard = self.submit_lock.lock().await;
        let tx = self.build_spend(chain, outputs).await?;

        let mut delay = self.backoff_ms;
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match chain.rpc().submit_transaction(&tx).await {
                Ok(tx_id) => return Ok(tx_id),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(attempt, error = %e, "transaction submit failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                    last_err = Some(e);
                }
                Err(e @ GameError::Funds(_)) => return Err(e),
                Err(e) => {
                    last_err = Some(e);
                    break;
                }
            }
        }
        Err(GameError::funds(format!(
            "transaction submit exhausted {} attempts: {}",
            self.max_attempts,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Greedy UTXO selection over the hot wallet, then an HMAC signature
    /// with the hot key over the canonical output list.
    async fn build_spend(&self, chain: &ChainWatcher, outputs: &[TxOutput]) -> GameResult<PaymentTx> {
        let total: u64 = outputs.iter().map(|o| o.amount).sum();
        let available = chain
            .utxos_by_address(std::slice::from_ref(&self.hot_address))
            .await?;
        let mut selected = Vec::new();
        let mut gathered = 0u64;
        for utxo in available.get(&self.hot_address).into_iter().flatten() {
            selected.push(utxo.outpoint.clone());
            gathered += utxo.amount;
            if gathered >= total {
                break;
            }
        }
        if gathered < total {
            return Err(GameError::funds(format!(
                "hot wallet holds {gathered} sompi, spend needs {total}"
            )));
        }
        let mut tx = PaymentTx {
            inputs: selected,
            outputs: outputs.to_vec(),
            signature: String::new(),
        };
        tx.signature = self.sign_outputs(&tx.outputs)?;
        Ok(tx)
    }

    fn sign_outputs(&self, outputs: &[TxOutput]) -> GameResult<String> {
        let canonical: String = outputs
            .iter()
            .map(|o| format!("{}:{};", o.address, o.amount))
            .collect();
        let mut mac = HmacSha256::new_from_slice(&self.hot_key)
            .map_err(|_| GameError::invariant("hot key rejected as signing key"))?;
        mac.update(canonical.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn master_key(seed: &[u8; 64]) -> ExtendedKey {
    let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed").expect("hmac accepts any key length");
    mac.update(seed);
    split_i(&mac.finalize().into_bytes())
}

fn derive_child(parent: &ExtendedKey, index: u32) -> ExtendedKey {
    let mut mac =
        HmacSha512::new_from_slice(&parent.chain_code).expect("hmac accepts any key length");
    mac.update(&parent.key);
    mac.update(&index.to_be_bytes());
    split_i(&mac.finalize().into_bytes())
}

fn derive_path(root: &ExtendedKey, path: &[u32]) -> ExtendedKey {
    path.iter().fold(root.clone(), |k, &i| derive_child(&k, i))
}

fn split_i(i: &[u8]) -> ExtendedKey {
    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&i[..32]);
    chain_code.copy_from_slice(&i[32..64]);
    ExtendedKey { key, chain_code }
}

/// Deterministic 31-bit derivation index from a label.
fn index31(label: &str) -> u32 {
    let digest = Sha256::digest(label.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF
}

fn render_address(network: Network, key: &[u8; 32]) -> String {
    let digest = Sha256::digest(key);
    format!("{}:{}", network.address_prefix(), hex::encode(&digest[..20]))
}
