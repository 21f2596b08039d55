//! In-process peer network for Coinmesh
//!
//! Nodes never hold references to each other. The [`Network`] owns every
//! [`LedgerNode`] in a registry keyed by [`NodeId`] and keeps adjacency as id
//! sets. Propagation is a breadth-first work queue: each origination event
//! (a submit, a mined block, a connection) drains its own queue, and a per-event
//! seen set guarantees each node handles a given transaction or block hash at
//! most once. Handlers run to completion one at a time, so no node is ever
//! re-entered mid-operation.

use crate::blockchain::Block;
use crate::config::LedgerConfig;
use crate::crypto::{BlockHash, PublicKey, Secp256k1Scheme, SignatureScheme, TxId};
use crate::error::{ChainError, Result};
use crate::node::LedgerNode;
use crate::sync::BlockOutcome;
use crate::transaction::Transaction;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// The one capability a notified node needs from the peer that notified it.
pub trait BlockSource {
    /// Fails with [`ChainError::NotFound`] for unknown hashes.
    fn fetch_block(&self, hash: &BlockHash) -> Result<Block>;
}

impl BlockSource for LedgerNode {
    fn fetch_block(&self, hash: &BlockHash) -> Result<Block> {
        self.get_block(hash).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug)]
enum Delivery {
    Transaction {
        to: NodeId,
        tx: Transaction,
    },
    Block {
        from: NodeId,
        to: NodeId,
        hash: BlockHash,
    },
}

/// Per-event dedup state.
#[derive(Default)]
struct Seen {
    transactions: HashSet<(NodeId, TxId)>,
    blocks: HashSet<(NodeId, BlockHash)>,
}

pub struct Network {
    config: LedgerConfig,
    scheme: Arc<dyn SignatureScheme>,
    nodes: BTreeMap<NodeId, LedgerNode>,
    peers: BTreeMap<NodeId, BTreeSet<NodeId>>,
    next_id: u32,
}

impl Network {
    pub fn new(config: LedgerConfig) -> Result<Self> {
        Self::with_scheme(config, Arc::new(Secp256k1Scheme))
    }

    pub fn with_scheme(config: LedgerConfig, scheme: Arc<dyn SignatureScheme>) -> Result<Self> {
        config.validate()?;
        Ok(Network {
            config,
            scheme,
            nodes: BTreeMap::new(),
            peers: BTreeMap::new(),
            next_id: 0,
        })
    }

    /// Register a new node with its own key pair and an empty chain.
    pub fn add_node(&mut self) -> Result<NodeId> {
        let node = LedgerNode::new(self.config.clone(), self.scheme.clone())?;
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        self.peers.insert(id, BTreeSet::new());
        debug!(node = %id, "Registered node");
        Ok(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn node(&self, id: NodeId) -> Result<&LedgerNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| ChainError::NetworkError(format!("Unknown node {}", id)))
    }

    /// Direct access for local-only operations; nothing done through this
    /// handle is propagated.
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut LedgerNode> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| ChainError::NetworkError(format!("Unknown node {}", id)))
    }

    pub fn connections(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.peers
            .get(&id)
            .map(|peers| peers.iter().copied().collect())
            .ok_or_else(|| ChainError::NetworkError(format!("Unknown node {}", id)))
    }

    /// Link `a` and `b` both ways. A new link makes each side notify the other
    /// of its current tip.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<()> {
        if a == b {
            return Err(ChainError::NetworkError(format!(
                "Cannot connect {} to itself",
                a
            )));
        }
        let a_tip = self.node(a)?.latest_hash();
        let b_tip = self.node(b)?.latest_hash();

        let newly_linked = self.peers.entry(a).or_default().insert(b);
        self.peers.entry(b).or_default().insert(a);
        if !newly_linked {
            return Ok(());
        }
        debug!(a = %a, b = %b, "Connected nodes");

        let queue = VecDeque::from([
            Delivery::Block {
                from: a,
                to: b,
                hash: a_tip,
            },
            Delivery::Block {
                from: b,
                to: a,
                hash: b_tip,
            },
        ]);
        self.gossip(queue, Seen::default())
    }

    /// Remove the link between `a` and `b`, if any.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> Result<()> {
        self.node(a)?;
        self.node(b)?;
        if let Some(peers) = self.peers.get_mut(&a) {
            peers.remove(&b);
        }
        if let Some(peers) = self.peers.get_mut(&b) {
            peers.remove(&a);
        }
        Ok(())
    }

    /// Submit `tx` at `origin` and, if admitted, gossip it outward. Each node
    /// that admits it forwards it to its own peers.
    pub fn submit_transaction(&mut self, origin: NodeId, tx: Transaction) -> Result<bool> {
        let accepted = self.node_mut(origin)?.submit_transaction(tx.clone());
        if accepted {
            self.broadcast_transaction(origin, tx)?;
        }
        Ok(accepted)
    }

    /// Have `origin` pay one of its coins to `target`, gossiping the result.
    pub fn create_transaction(
        &mut self,
        origin: NodeId,
        target: &PublicKey,
    ) -> Result<Option<Transaction>> {
        let created = self.node_mut(origin)?.create_transaction(target);
        if let Some(tx) = &created {
            self.broadcast_transaction(origin, tx.clone())?;
        }
        Ok(created)
    }

    /// Mine a block at `origin` and notify its peers.
    pub fn mine_block(&mut self, origin: NodeId) -> Result<BlockHash> {
        let hash = self.node_mut(origin)?.mine_block()?;

        let mut seen = Seen::default();
        seen.blocks.insert((origin, hash));
        let queue = self.block_deliveries(origin, hash);
        self.gossip(queue, seen)?;
        Ok(hash)
    }

    fn broadcast_transaction(&mut self, origin: NodeId, tx: Transaction) -> Result<()> {
        let mut seen = Seen::default();
        seen.transactions.insert((origin, tx.id()));
        let queue = self.transaction_deliveries(origin, &tx);
        self.gossip(queue, seen)
    }

    fn transaction_deliveries(&self, from: NodeId, tx: &Transaction) -> VecDeque<Delivery> {
        self.peers
            .get(&from)
            .into_iter()
            .flatten()
            .map(|&to| Delivery::Transaction { to, tx: tx.clone() })
            .collect()
    }

    fn block_deliveries(&self, from: NodeId, hash: BlockHash) -> VecDeque<Delivery> {
        self.peers
            .get(&from)
            .into_iter()
            .flatten()
            .map(|&to| Delivery::Block { from, to, hash })
            .collect()
    }

    /// Drain one origination event's queue. A fatal error at one node does not
    /// stop delivery to the others; the first one is returned at the end.
    fn gossip(&mut self, mut queue: VecDeque<Delivery>, mut seen: Seen) -> Result<()> {
        let mut fatal = None;

        while let Some(delivery) = queue.pop_front() {
            match delivery {
                Delivery::Transaction { to, tx } => {
                    if !seen.transactions.insert((to, tx.id())) {
                        continue;
                    }
                    let Some(node) = self.nodes.get_mut(&to) else {
                        continue;
                    };
                    if node.submit_transaction(tx.clone()) {
                        queue.extend(self.transaction_deliveries(to, &tx));
                    }
                }
                Delivery::Block { from, to, hash } => {
                    if !seen.blocks.insert((to, hash)) {
                        continue;
                    }
                    match self.deliver_block(from, to, hash) {
                        Ok(BlockOutcome::Adopted { tip, .. }) => {
                            queue.extend(self.block_deliveries(to, tip));
                        }
                        Ok(outcome) => {
                            debug!(from = %from, to = %to, block = %hash.short(), ?outcome, "Block notification handled");
                        }
                        Err(e) => {
                            error!(node = %to, block = %hash.short(), "Block notification failed: {}", e);
                            fatal.get_or_insert(e);
                        }
                    }
                }
            }
        }

        fatal.map_or(Ok(()), Err)
    }

    fn deliver_block(&mut self, from: NodeId, to: NodeId, hash: BlockHash) -> Result<BlockOutcome> {
        // Take the receiver out of the registry so the sender can be borrowed
        // alongside it.
        let Some(mut receiver) = self.nodes.remove(&to) else {
            return Ok(BlockOutcome::Unsubstantiated);
        };
        let outcome = match self.nodes.get(&from) {
            Some(sender) => receiver.notify_of_block(hash, sender),
            None => Ok(BlockOutcome::Unsubstantiated),
        };
        self.nodes.insert(to, receiver);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(n: usize) -> (Network, Vec<NodeId>) {
        let mut net = Network::new(LedgerConfig::default()).unwrap();
        let ids = (0..n).map(|_| net.add_node().unwrap()).collect();
        (net, ids)
    }

    #[test]
    fn test_connect_rules() {
        let (mut net, ids) = network(2);
        assert!(net.connect(ids[0], ids[0]).is_err());
        assert!(net.connect(ids[0], NodeId(99)).is_err());

        net.connect(ids[0], ids[1]).unwrap();
        assert_eq!(net.connections(ids[0]).unwrap(), vec![ids[1]]);
        assert_eq!(net.connections(ids[1]).unwrap(), vec![ids[0]]);

        net.disconnect(ids[0], ids[1]).unwrap();
        assert!(net.connections(ids[0]).unwrap().is_empty());
        // Disconnecting twice is fine.
        net.disconnect(ids[1], ids[0]).unwrap();
    }

    #[test]
    fn test_block_reaches_multi_hop_peers() {
        let (mut net, ids) = network(3);
        net.connect(ids[0], ids[1]).unwrap();
        net.connect(ids[1], ids[2]).unwrap();

        let hash = net.mine_block(ids[0]).unwrap();
        for id in &ids {
            assert_eq!(net.node(*id).unwrap().latest_hash(), hash);
        }
    }

    #[test]
    fn test_transaction_gossip_terminates_on_cycles() {
        let (mut net, ids) = network(3);
        net.connect(ids[0], ids[1]).unwrap();
        net.connect(ids[1], ids[2]).unwrap();
        net.connect(ids[2], ids[0]).unwrap();
        net.mine_block(ids[0]).unwrap();

        let target = net.node(ids[2]).unwrap().address().clone();
        let tx = net.create_transaction(ids[0], &target).unwrap().unwrap();
        for id in &ids {
            assert_eq!(net.node(*id).unwrap().mempool(), &[tx.clone()]);
        }
    }

    #[test]
    fn test_rejected_transaction_is_not_forwarded() {
        let (mut net, ids) = network(2);
        net.connect(ids[0], ids[1]).unwrap();
        net.mine_block(ids[0]).unwrap();

        let coinbase = Transaction::coinbase(net.node(ids[0]).unwrap().address().clone(), 64);
        assert!(!net.submit_transaction(ids[0], coinbase).unwrap());
        assert!(net.node(ids[1]).unwrap().mempool().is_empty());
    }
}
