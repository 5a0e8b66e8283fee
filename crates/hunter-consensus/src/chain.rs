//! The in-memory chain index: a DAG of headers in a contiguous arena.
//!
//! Nodes reference each other by index instead of pointers; `prev` always
//! links toward genesis, `next` is set only along the best chain. The best
//! tip is the node with the greatest cumulative work. Height lookups walk
//! bidirectionally from a cached last-accessed node.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use primitive_types::U256;

use hunter_core::error::BlockError;
use hunter_core::pow::block_work;
use hunter_core::types::{BlockHeader, Hash256, PowAlgo};

pub type BlockIndexId = u32;

/// One header in the arena.
#[derive(Clone, Debug)]
pub struct BlockIndexNode {
    pub hash: Hash256,
    pub prev: Option<BlockIndexId>,
    /// Successor on the best chain only.
    pub next: Option<BlockIndexId>,
    pub height: i32,
    pub time: u32,
    pub bits: u32,
    pub version: i32,
    /// Total work from genesis through this block.
    pub chain_work: U256,
}

impl BlockIndexNode {
    pub fn algo(&self) -> PowAlgo {
        PowAlgo::from_version(self.version)
    }
}

/// The header DAG with a best-chain pointer.
pub struct ChainIndex {
    nodes: Vec<BlockIndexNode>,
    by_hash: HashMap<Hash256, BlockIndexId>,
    best: Option<BlockIndexId>,
    /// Cache for `find_by_height`, warm after sequential access.
    last_accessed: AtomicU32,
}

impl Default for ChainIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainIndex {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            by_hash: HashMap::new(),
            best: None,
            last_accessed: AtomicU32::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: BlockIndexId) -> &BlockIndexNode {
        &self.nodes[id as usize]
    }

    pub fn lookup(&self, hash: &Hash256) -> Option<BlockIndexId> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn best(&self) -> Option<BlockIndexId> {
        self.best
    }

    pub fn best_height(&self) -> i32 {
        self.best.map(|id| self.get(id).height).unwrap_or(-1)
    }

    pub fn best_work(&self) -> U256 {
        self.best.map(|id| self.get(id).chain_work).unwrap_or_default()
    }

    /// Insert a header. Its parent must already be present, except for the
    /// genesis header (zero prev-hash).
    pub fn insert(&mut self, header: &BlockHeader) -> Result<BlockIndexId, BlockError> {
        let hash = header.hash();
        if let Some(id) = self.by_hash.get(&hash) {
            return Ok(*id);
        }
        let (prev, height, parent_work) = if header.prev_hash.is_zero() {
            (None, 0, U256::zero())
        } else {
            let pid = self
                .lookup(&header.prev_hash)
                .ok_or_else(|| BlockError::UnknownParent(header.prev_hash.to_string()))?;
            let parent = self.get(pid);
            (Some(pid), parent.height + 1, parent.chain_work)
        };

        let id = self.nodes.len() as BlockIndexId;
        self.nodes.push(BlockIndexNode {
            hash,
            prev,
            next: None,
            height,
            time: header.time,
            bits: header.bits,
            version: header.version,
            chain_work: parent_work + block_work(header.bits, header.algo()),
        });
        self.by_hash.insert(hash, id);
        Ok(id)
    }

    /// Repoint the best chain at `tip`, fixing `next` links: cleared from
    /// the old branch down to the fork, set along the new branch.
    pub fn set_best(&mut self, tip: BlockIndexId) {
        if let Some(old) = self.best {
            let fork = self.common_ancestor(old, tip);
            let mut walk = Some(old);
            while walk != fork {
                let id = walk.expect("old branch reaches the fork");
                self.nodes[id as usize].next = None;
                walk = self.nodes[id as usize].prev;
            }
        }
        // Link the new branch top-down by first collecting it bottom-up.
        let mut branch = Vec::new();
        let mut walk = Some(tip);
        while let Some(id) = walk {
            branch.push(id);
            // Stop on rejoining the linked trunk or the old tip.
            if self.nodes[id as usize].next.is_some() || self.best == Some(id) {
                break;
            }
            walk = self.nodes[id as usize].prev;
        }
        for pair in branch.windows(2) {
            let (child, parent) = (pair[0], pair[1]);
            self.nodes[parent as usize].next = Some(child);
        }
        self.nodes[tip as usize].next = None;
        self.best = Some(tip);
    }

    /// The best-chain node at `height`, walking from the cached position.
    pub fn find_by_height(&self, height: i32) -> Option<BlockIndexId> {
        let best = self.best?;
        if height < 0 || height > self.get(best).height {
            return None;
        }
        let cached = self.last_accessed.load(Ordering::Relaxed);
        let mut id = if (cached as usize) < self.nodes.len() && self.on_best_chain(cached) {
            cached
        } else {
            best
        };
        while self.get(id).height > height {
            id = self.get(id).prev?;
        }
        while self.get(id).height < height {
            id = self.get(id).next?;
        }
        self.last_accessed.store(id, Ordering::Relaxed);
        Some(id)
    }

    fn on_best_chain(&self, id: BlockIndexId) -> bool {
        self.get(id).next.is_some() || self.best == Some(id)
    }

    /// Median time of the 11 blocks ending at `id`.
    pub fn median_time_past(&self, id: BlockIndexId) -> u32 {
        let mut times = Vec::with_capacity(11);
        let mut walk = Some(id);
        while let Some(cur) = walk {
            if times.len() == 11 {
                break;
            }
            times.push(self.get(cur).time);
            walk = self.get(cur).prev;
        }
        times.sort_unstable();
        times[times.len() / 2]
    }

    /// The two most recent ancestors (inclusive) mined with `algo`, for
    /// the per-algorithm retarget.
    pub fn algo_ancestors(
        &self,
        from: BlockIndexId,
        algo: PowAlgo,
    ) -> Option<hunter_core::pow::AlgoAncestors> {
        let first = self.last_of_algo(Some(from), algo)?;
        let first_node = self.get(first);
        let second = self.last_of_algo(first_node.prev, algo)?;
        let second_node = self.get(second);
        Some(hunter_core::pow::AlgoAncestors {
            prev: (first_node.bits, first_node.time),
            prev_prev_time: second_node.time,
        })
    }

    fn last_of_algo(&self, from: Option<BlockIndexId>, algo: PowAlgo) -> Option<BlockIndexId> {
        let mut walk = from;
        while let Some(id) = walk {
            if self.get(id).algo() == algo {
                return Some(id);
            }
            walk = self.get(id).prev;
        }
        None
    }

    /// Deepest node on both ancestries.
    pub fn common_ancestor(
        &self,
        a: BlockIndexId,
        b: BlockIndexId,
    ) -> Option<BlockIndexId> {
        let mut a = Some(a);
        let mut b = Some(b);
        while let (Some(x), Some(y)) = (a, b) {
            let (hx, hy) = (self.get(x).height, self.get(y).height);
            if hx > hy {
                a = self.get(x).prev;
            } else if hy > hx {
                b = self.get(y).prev;
            } else if x == y {
                return Some(x);
            } else {
                a = self.get(x).prev;
                b = self.get(y).prev;
            }
        }
        None
    }

    /// The branch from (excl.) `ancestor` up to (incl.) `tip`, in
    /// ascending height order.
    pub fn branch_to(
        &self,
        ancestor: BlockIndexId,
        tip: BlockIndexId,
    ) -> Vec<BlockIndexId> {
        let mut branch = Vec::new();
        let mut walk = Some(tip);
        while let Some(id) = walk {
            if id == ancestor {
                break;
            }
            branch.push(id);
            walk = self.get(id).prev;
        }
        branch.reverse();
        branch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hunter_core::pow::{next_work_required, pow_limit, target_to_compact};
    use hunter_core::constants::Network;
    use hunter_core::types::BLOCK_VERSION_SCRYPT;

    fn header(prev: Hash256, time: u32, nonce: u32, version: i32) -> BlockHeader {
        BlockHeader {
            version,
            prev_hash: prev,
            tx_merkle_root: Hash256([nonce as u8; 32]),
            game_merkle_root: Hash256::ZERO,
            time,
            bits: target_to_compact(pow_limit(Network::Mainnet, PowAlgo::from_version(version))),
            nonce,
            aux_pow: None,
        }
    }

    /// Build a straight chain of `n` headers, returning ids.
    fn build_chain(index: &mut ChainIndex, n: usize) -> Vec<BlockIndexId> {
        let mut ids = Vec::new();
        let mut prev = Hash256::ZERO;
        for i in 0..n {
            let h = header(prev, 1000 + i as u32 * 60, i as u32, 1);
            prev = h.hash();
            let id = index.insert(&h).unwrap();
            index.set_best(id);
            ids.push(id);
        }
        ids
    }

    #[test]
    fn insert_and_heights() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 5);
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(index.get(*id).height, i as i32);
        }
        assert_eq!(index.best_height(), 4);
    }

    #[test]
    fn orphan_insert_fails() {
        let mut index = ChainIndex::new();
        let orphan = header(Hash256([9; 32]), 1000, 0, 1);
        assert!(matches!(index.insert(&orphan), Err(BlockError::UnknownParent(_))));
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let mut index = ChainIndex::new();
        let genesis = header(Hash256::ZERO, 1000, 0, 1);
        let a = index.insert(&genesis).unwrap();
        let b = index.insert(&genesis).unwrap();
        assert_eq!(a, b);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn chain_work_accumulates() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 3);
        assert!(index.get(ids[2]).chain_work > index.get(ids[1]).chain_work);
        assert!(index.get(ids[1]).chain_work > index.get(ids[0]).chain_work);
    }

    #[test]
    fn scrypt_work_boost_compensates_limit_gap() {
        let mut index = ChainIndex::new();
        let genesis = header(Hash256::ZERO, 1000, 0, 1);
        let gid = index.insert(&genesis).unwrap();
        index.set_best(gid);

        let sha_child = header(genesis.hash(), 1100, 1, 1);
        let scrypt_child = header(genesis.hash(), 1100, 2, 1 | BLOCK_VERSION_SCRYPT);
        let sid = index.insert(&sha_child).unwrap();
        let cid = index.insert(&scrypt_child).unwrap();
        // The 12-bit boost is exactly the gap between the two limits
        // (2^-32 vs 2^-20), so limit-difficulty blocks weigh the same.
        assert_eq!(index.get(cid).chain_work, index.get(sid).chain_work);
    }

    #[test]
    fn next_links_follow_best_chain() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 4);
        for pair in ids.windows(2) {
            assert_eq!(index.get(pair[0]).next, Some(pair[1]));
        }
        assert_eq!(index.get(ids[3]).next, None);
    }

    #[test]
    fn find_by_height_walks_both_ways() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 10);
        assert_eq!(index.find_by_height(0), Some(ids[0]));
        assert_eq!(index.find_by_height(9), Some(ids[9]));
        assert_eq!(index.find_by_height(5), Some(ids[5]));
        // Cache warm at 5; go both directions.
        assert_eq!(index.find_by_height(7), Some(ids[7]));
        assert_eq!(index.find_by_height(2), Some(ids[2]));
        assert_eq!(index.find_by_height(10), None);
        assert_eq!(index.find_by_height(-1), None);
    }

    #[test]
    fn reorg_relinks_next_pointers() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 4);

        // A competing branch from height 1 with more blocks.
        let fork_parent_hash = index.get(ids[1]).hash;
        let mut prev = fork_parent_hash;
        let mut branch = Vec::new();
        for i in 0..4 {
            let h = header(prev, 2000 + i * 60, 100 + i, 1);
            prev = h.hash();
            branch.push(index.insert(&h).unwrap());
        }
        index.set_best(*branch.last().unwrap());

        // Old branch unlinked.
        assert_eq!(index.get(ids[2]).next, None);
        assert_eq!(index.get(ids[3]).next, None);
        // New branch linked from the fork.
        assert_eq!(index.get(ids[1]).next, Some(branch[0]));
        assert_eq!(index.find_by_height(5), Some(branch[3]));
        assert_eq!(index.best_height(), 5);
    }

    #[test]
    fn median_time_past_is_median() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 11);
        // Times are 1000, 1060, ..., 1600; the median of the 11 is 1300.
        assert_eq!(index.median_time_past(ids[10]), 1300);
        // Early chain: median over fewer blocks.
        assert_eq!(index.median_time_past(ids[0]), 1000);
        assert_eq!(index.median_time_past(ids[2]), 1060);
    }

    #[test]
    fn algo_ancestors_skip_other_algo() {
        let mut index = ChainIndex::new();
        let g = header(Hash256::ZERO, 1000, 0, 1);
        let gid = index.insert(&g).unwrap();
        index.set_best(gid);
        let s1 = header(g.hash(), 1100, 1, 1 | BLOCK_VERSION_SCRYPT);
        let s1id = index.insert(&s1).unwrap();
        index.set_best(s1id);
        let h2 = header(s1.hash(), 1200, 2, 1);
        let h2id = index.insert(&h2).unwrap();
        index.set_best(h2id);

        // For sha256d from the tip, ancestors are the tip (h2) and genesis.
        let anc = index.algo_ancestors(h2id, PowAlgo::Sha256d).unwrap();
        assert_eq!(anc.prev.1, 1200);
        assert_eq!(anc.prev_prev_time, 1000);
        // Only one scrypt block exists: no retarget data yet.
        assert!(index.algo_ancestors(h2id, PowAlgo::Scrypt).is_none());
    }

    #[test]
    fn common_ancestor_of_fork() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 3);
        let fork = header(index.get(ids[1]).hash, 5000, 77, 1);
        let fid = index.insert(&fork).unwrap();
        assert_eq!(index.common_ancestor(ids[2], fid), Some(ids[1]));
        assert_eq!(index.common_ancestor(ids[2], ids[2]), Some(ids[2]));
    }

    #[test]
    fn branch_to_lists_ascending() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 5);
        let branch = index.branch_to(ids[1], ids[4]);
        assert_eq!(branch, vec![ids[2], ids[3], ids[4]]);
        assert!(index.branch_to(ids[4], ids[4]).is_empty());
    }

    #[test]
    fn retarget_uses_algo_ancestors() {
        let mut index = ChainIndex::new();
        let ids = build_chain(&mut index, 5);
        let anc = index.algo_ancestors(ids[4], PowAlgo::Sha256d);
        let bits = next_work_required(Network::Mainnet, PowAlgo::Sha256d, anc);
        assert_ne!(bits, 0);
    }
}
