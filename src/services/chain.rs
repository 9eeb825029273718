//! # Chain RPC Boundary
//!
//! ## Purpose
//! Everything the orchestrator needs from the blockchain, behind one trait:
//! UTXO queries by address, transaction submission, and the DAG tip (virtual
//! DAA score plus tip hashes). The production binary wires a node client
//! behind `ChainRpc`; `SimulatedChain` implements the same trait for local
//! development and the test suite.
//!
//! `ChainWatcher` wraps the RPC with connectivity handling: queries are only
//! issued while connected, and `wait_for_connection` gives callers a bounded
//! wait instead of a hard failure during reconnect windows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{GameError, GameResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outpoint {
    pub transaction_id: String,
    pub index: u32,
}

/// One unspent output as reported by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub address: String,
    /// Amount in sompi.
    pub amount: u64,
    pub outpoint: Outpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDagInfo {
    pub virtual_daa_score: u64,
    /// Possibly empty during node startup.
    pub tip_hashes: Vec<String>,
    pub pruning_point_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub amount: u64,
}

/// A signed spend from the hot wallet: inputs by outpoint, one output per
/// payee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTx {
    pub inputs: Vec<Outpoint>,
    pub outputs: Vec<TxOutput>,
    pub signature: String,
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_utxos_by_addresses(&self, addresses: &[String]) -> GameResult<Vec<UtxoEntry>>;

    /// Returns the accepted transaction id.
    async fn submit_transaction(&self, tx: &PaymentTx) -> GameResult<String>;

    async fn get_block_dag_info(&self) -> GameResult<BlockDagInfo>;

    fn is_connected(&self) -> bool;
}

/// Connectivity-aware wrapper around a `ChainRpc`.
pub struct ChainWatcher {
    rpc: Arc<dyn ChainRpc>,
}

impl ChainWatcher {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    /// Waits until the node is reachable, polling with a short backoff.
    pub async fn wait_for_connection(&self, timeout: Duration) -> GameResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut delay = Duration::from_millis(50);
        while !self.rpc.is_connected() {
            if tokio::time::Instant::now() >= deadline {
                return Err(GameError::transient("chain connection wait timed out"));
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(1));
        }
        Ok(())
    }

    fn ensure_connected(&self) -> GameResult<()> {
        if self.rpc.is_connected() {
            Ok(())
        } else {
            Err(GameError::transient("chain rpc is disconnected"))
        }
    }

    /// Current DAG tip; the DAA score schedules LOCKED -> PLAYING.
    pub async fn current_tip(&self) -> GameResult<BlockDagInfo> {
        self.ensure_connected()?;
        self.rpc.get_block_dag_info().await
    }

    /// UTXOs grouped by address. Addresses with no UTXOs map to empty lists.
    pub async fn utxos_by_address(
        &self,
        addresses: &[String],
    ) -> GameResult<HashMap<String, Vec<UtxoEntry>>> {
        self.ensure_connected()?;
        let mut grouped: HashMap<String, Vec<UtxoEntry>> = addresses
            .iter()
            .map(|a| (a.clone(), Vec::new()))
            .collect();
        for entry in self.rpc.get_utxos_by_addresses(addresses).await? {
            grouped.entry(entry.address.clone()).or_default().push(entry);
        }
        Ok(grouped)
    }
}

/// Deterministic in-process chain used by local development and tests.
///
/// The DAA score advances only when told to, deposits appear via `credit`,
/// and submissions can be scripted to fail transiently or terminally.
pub struct SimulatedChain {
    connected: AtomicBool,
    daa_score: AtomicU64,
    tx_counter: AtomicU64,
    state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    utxos: HashMap<String, Vec<UtxoEntry>>,
    submitted: Vec<PaymentTx>,
    /// Numbers of upcoming `submit_transaction` calls to reject.
    transient_failures: u32,
    terminal_failures: u32,
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            daa_score: AtomicU64::new(1),
            tx_counter: AtomicU64::new(0),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn advance_daa(&self, blocks: u64) {
        self.daa_score.fetch_add(blocks, Ordering::SeqCst);
    }

    pub fn daa_score(&self) -> u64 {
        self.daa_score.load(Ordering::SeqCst)
    }

    /// Credits an address with a fresh UTXO, as if a deposit landed.
    pub async fn credit(&self, address: &str, amount: u64) -> String {
        let tx_id = self.next_tx_id();
        self.state
            .lock()
            .await
            .utxos
            .entry(address.to_string())
            .or_default()
            .push(UtxoEntry {
                address: address.to_string(),
                amount,
                outpoint: Outpoint {
                    transaction_id: tx_id.clone(),
                    index: 0,
                },
            });
        tx_id
    }

    /// Script the next submissions to fail. Transient failures retry;
    /// terminal failures are permanent rejections.
    pub async fn fail_next_submissions(&self, transient: u32, terminal: u32) {
        let mut state = self.state.lock().await;
        state.transient_failures = transient;
        state.terminal_failures = terminal;
    }

    pub async fn submitted_transactions(&self) -> Vec<PaymentTx> {
        self.state.lock().await.submitted.clone()
    }

    fn next_tx_id(&self) -> String {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        hex::encode(Sha256::digest(n.to_be_bytes()))
    }

    fn tip_hash_at(score: u64) -> String {
        hex::encode(Sha256::digest(score.to_be_bytes()))
    }
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainRpc for SimulatedChain {
    async fn get_utxos_by_addresses(&self, addresses: &[String]) -> GameResult<Vec<UtxoEntry>> {
        let state = self.state.lock().await;
        Ok(addresses
            .iter()
            .flat_map(|a| state.utxos.get(a).cloned().unwrap_or_default())
            .collect())
    }

    async fn submit_transaction(&self, tx: &PaymentTx) -> GameResult<String> {
        let mut state = self.state.lock().await;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(GameError::transient("simulated node unavailable"));
        }
        if state.terminal_failures > 0 {
            state.terminal_failures -= 1;
            return Err(GameError::funds("simulated terminal rejection"));
        }
        // consume inputs, materialize outputs
        for input in &tx.inputs {
            for utxos in state.utxos.values_mut() {
                utxos.retain(|u| u.outpoint != *input);
            }
        }
        let tx_id = self.next_tx_id();
        for (i, out) in tx.outputs.iter().enumerate() {
            state
                .utxos
                .entry(out.address.clone())
                .or_default()
                .push(UtxoEntry {
                    address: out.address.clone(),
                    amount: out.amount,
                    outpoint: Outpoint {
                        transaction_id: tx_id.clone(),
                        index: i as u32,
                    },
                });
        }
        state.submitted.push(tx.clone());
        Ok(tx_id)
    }

    async fn get_block_dag_info(&self) -> GameResult<BlockDagInfo> {
        let score = self.daa_score();
        Ok(BlockDagInfo {
            virtual_daa_score: score,
            tip_hashes: vec![Self::tip_hash_at(score)],
            pruning_point_hash: Self::tip_hash_at(0),
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watcher_refuses_disconnected_queries() {
        let sim = Arc::new(SimulatedChain::new());
        sim.set_connected(false);
        let watcher = ChainWatcher::new(sim.clone());
        assert!(watcher.current_tip().await.is_err());
        sim.set_connected(true);
        assert!(watcher.current_tip().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_times_out() {
        let sim = Arc::new(SimulatedChain::new());
        sim.set_connected(false);
        let watcher = ChainWatcher::new(sim);
        let err = watcher
            .wait_for_connection(Duration::from_millis(120))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_utxos_grouped_with_empty_lists() {
        let sim = Arc::new(SimulatedChain::new());
        sim.credit("addr1", 100).await;
        sim.credit("addr1", 50).await;
        let watcher = ChainWatcher::new(sim);
        let grouped = watcher
            .utxos_by_address(&["addr1".into(), "addr2".into()])
            .await
            .unwrap();
        assert_eq!(grouped["addr1"].len(), 2);
        assert!(grouped["addr2"].is_empty());
    }

    #[tokio::test]
    async fn test_simulated_submit_moves_funds() {
        let sim = SimulatedChain::new();
        let funding = sim.credit("hot", 500).await;
        let tx = PaymentTx {
            inputs: vec![Outpoint {
                transaction_id: funding,
                index: 0,
            }],
            outputs: vec![TxOutput {
                address: "winner".into(),
                amount: 500,
            }],
            signature: "sig".into(),
        };
        sim.submit_transaction(&tx).await.unwrap();
        let utxos = sim
            .get_utxos_by_addresses(&["hot".into(), "winner".into()])
            .await
            .unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].address, "winner");
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let sim = SimulatedChain::new();
        sim.fail_next_submissions(1, 1).await;
        let tx = PaymentTx {
            inputs: vec![],
            outputs: vec![],
            signature: String::new(),
        };
        assert!(sim.submit_transaction(&tx).await.unwrap_err().is_retryable());
        assert!(matches!(
            sim.submit_transaction(&tx).await.unwrap_err(),
            GameError::Funds(_)
        ));
        assert!(sim.submit_transaction(&tx).await.is_ok());
    }

    #[tokio::test]
    async fn test_tip_hash_tracks_score() {
        let sim = SimulatedChain::new();
        let a = sim.get_block_dag_info().await.unwrap();
        sim.advance_daa(5);
        let b = sim.get_block_dag_info().await.unwrap();
        assert_eq!(b.virtual_daa_score, a.virtual_daa_score + 5);
        assert_ne!(a.tip_hashes[0], b.tip_hashes[0]);
    }
}
