// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - IN-MEMORY HEADER CHAIN
//
// Canonical header store for tests, tooling and the query API. Headers are
// indexed by number (canonical) and by hash.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tessera_core::config::ConsensusConfig;
use tessera_core::header::{ChainHeaderReader, Header};
use tessera_core::Hash;

use crate::error::ConsensusError;

#[derive(Default)]
struct Headers {
    by_number: BTreeMap<u64, Hash>,
    by_hash: HashMap<Hash, Header>,
}

pub struct MemoryChain {
    config: ConsensusConfig,
    headers: RwLock<Headers>,
}

impl MemoryChain {
    pub fn new(config: ConsensusConfig, genesis: Header) -> Self {
        let chain = Self {
            config,
            headers: RwLock::new(Headers::default()),
        };
        chain.insert_unchecked(genesis);
        chain
    }

    fn insert_unchecked(&self, header: Header) {
        let mut headers = self.headers.write().unwrap_or_else(|e| e.into_inner());
        let hash = header.hash();
        headers.by_number.insert(header.number, hash);
        headers.by_hash.insert(hash, header);
    }

    /// Append `header` on top of the current head
    pub fn insert(&self, header: Header) -> Result<(), ConsensusError> {
        let head = self
            .current_header()
            .ok_or_else(|| ConsensusError::UnknownBlock("empty chain".to_string()))?;
        if header.parent_hash != head.hash() || header.number != head.number + 1 {
            return Err(ConsensusError::UnknownBlock(format!(
                "#{} does not extend head #{}",
                header.number, head.number
            )));
        }
        self.insert_unchecked(header);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.headers.read().map(|h| h.by_number.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChainHeaderReader for MemoryChain {
    fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    fn current_header(&self) -> Option<Header> {
        let headers = self.headers.read().ok()?;
        let (_, hash) = headers.by_number.iter().next_back()?;
        headers.by_hash.get(hash).cloned()
    }

    fn header_by_number(&self, number: u64) -> Option<Header> {
        let headers = self.headers.read().ok()?;
        let hash = headers.by_number.get(&number)?;
        headers.by_hash.get(hash).cloned()
    }

    fn header_by_hash(&self, hash: &Hash) -> Option<Header> {
        self.headers.read().ok()?.by_hash.get(hash).cloned()
    }
}
