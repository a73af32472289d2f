// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - FUL BALANCE LEDGER
//
// Secondary account ledger, independent of the main chain state. FUL pays
// for flow-usage reporting. Callers only see the `FulState` capability set;
// the production backing is the Merkle-Patricia trie, tests may use the
// flat map. Both commit through a `KeyValueStore`, so a provider can be
// pointed at a staging overlay with `with_store`.
//
// Invariants:
// - balances never go negative: `sub` past zero fails and changes nothing
// - an account whose balance reaches zero is removed from the ledger
// - `copy` is commit + reopen, never a deep clone
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::store::{load_blob, save_blob, CacheKey, KeyValueStore, MemoryStore, StoreError};
use crate::trie::{empty_root, Trie};
use crate::{keccak256, Address, Hash};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FulError {
    #[error("insufficient FUL balance for {address}: have {balance}, need {requested}")]
    InsufficientBalance {
        address: Address,
        balance: u128,
        requested: u128,
    },
    #[error("FUL balance overflow for {0}")]
    Overflow(Address),
    #[error("FUL storage: {0}")]
    Storage(#[from] StoreError),
}

/// Trie leaf value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulAccount {
    pub address: Address,
    pub balance: u128,
}

pub trait FulState: Send {
    fn get(&self, address: &Address) -> Result<u128, FulError>;

    /// A zero amount removes the account
    fn set(&mut self, address: &Address, amount: u128) -> Result<(), FulError>;

    fn delete(&mut self, address: &Address) -> Result<(), FulError>;

    /// Content hash of the current (possibly uncommitted) state
    fn root(&self) -> Hash;

    /// Persist and return the new root
    fn commit(&mut self) -> Result<Hash, FulError>;

    fn get_all(&self) -> Result<BTreeMap<Address, u128>, FulError>;

    /// Commit, then reopen at the resulting root
    fn copy(&mut self) -> Result<Box<dyn FulState>, FulError>;

    fn add(&mut self, address: &Address, amount: u128) -> Result<(), FulError> {
        let balance = self.get(address)?;
        let updated = balance
            .checked_add(amount)
            .ok_or(FulError::Overflow(*address))?;
        self.set(address, updated)
    }

    fn sub(&mut self, address: &Address, amount: u128) -> Result<(), FulError> {
        let balance = self.get(address)?;
        if amount > balance {
            return Err(FulError::InsufficientBalance {
                address: *address,
                balance,
                requested: amount,
            });
        }
        self.set(address, balance - amount)
    }
}

/// Opens ledger states at committed roots
pub trait FulProvider: Send + Sync {
    fn open(&self, root: Hash) -> Result<Box<dyn FulState>, FulError>;

    fn empty_root(&self) -> Hash;

    /// Store that commits write to
    fn store(&self) -> Arc<dyn KeyValueStore>;

    /// The same ledger reading from and committing to `store`
    fn with_store(&self, store: Arc<dyn KeyValueStore>) -> Box<dyn FulProvider>;
}

// ─────────────────────────────────────────────────────────────────
// TRIE-BACKED LEDGER
// ─────────────────────────────────────────────────────────────────

pub struct TrieFulState {
    trie: Trie,
}

impl TrieFulState {
    fn key(address: &Address) -> Hash {
        keccak256(address.as_bytes())
    }
}

impl FulState for TrieFulState {
    fn get(&self, address: &Address) -> Result<u128, FulError> {
        match self.trie.get(Self::key(address).as_bytes())? {
            Some(bytes) => {
                let account: FulAccount = bincode::deserialize(&bytes).map_err(StoreError::from)?;
                Ok(account.balance)
            }
            None => Ok(0),
        }
    }

    fn set(&mut self, address: &Address, amount: u128) -> Result<(), FulError> {
        if amount == 0 {
            return self.delete(address);
        }
        let account = FulAccount {
            address: *address,
            balance: amount,
        };
        let bytes = bincode::serialize(&account).map_err(StoreError::from)?;
        self.trie.insert(Self::key(address).as_bytes(), bytes)?;
        Ok(())
    }

    fn delete(&mut self, address: &Address) -> Result<(), FulError> {
        self.trie.remove(Self::key(address).as_bytes())?;
        Ok(())
    }

    fn root(&self) -> Hash {
        self.trie.root_hash()
    }

    fn commit(&mut self) -> Result<Hash, FulError> {
        Ok(self.trie.commit()?)
    }

    fn get_all(&self) -> Result<BTreeMap<Address, u128>, FulError> {
        let mut out = BTreeMap::new();
        for (_, bytes) in self.trie.entries()? {
            let account: FulAccount = bincode::deserialize(&bytes).map_err(StoreError::from)?;
            out.insert(account.address, account.balance);
        }
        Ok(out)
    }

    fn copy(&mut self) -> Result<Box<dyn FulState>, FulError> {
        let root = self.commit()?;
        Ok(Box::new(TrieFulState {
            trie: Trie::open(self.trie.store(), root)?,
        }))
    }
}

pub struct TrieFulProvider {
    store: Arc<dyn KeyValueStore>,
}

impl TrieFulProvider {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl FulProvider for TrieFulProvider {
    fn open(&self, root: Hash) -> Result<Box<dyn FulState>, FulError> {
        Ok(Box::new(TrieFulState {
            trie: Trie::open(Arc::clone(&self.store), root)?,
        }))
    }

    fn empty_root(&self) -> Hash {
        empty_root()
    }

    fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    fn with_store(&self, store: Arc<dyn KeyValueStore>) -> Box<dyn FulProvider> {
        Box::new(TrieFulProvider::new(store))
    }
}

// ─────────────────────────────────────────────────────────────────
// FLAT-MAP LEDGER
// ─────────────────────────────────────────────────────────────────

fn memory_root(balances: &BTreeMap<Address, u128>) -> Hash {
    keccak256(&bincode::serialize(balances).unwrap_or_default())
}

/// Whole balance map in memory; a commit stores the map under its hash
pub struct MemoryFulState {
    balances: BTreeMap<Address, u128>,
    store: Arc<dyn KeyValueStore>,
}

impl FulState for MemoryFulState {
    fn get(&self, address: &Address) -> Result<u128, FulError> {
        Ok(self.balances.get(address).copied().unwrap_or(0))
    }

    fn set(&mut self, address: &Address, amount: u128) -> Result<(), FulError> {
        if amount == 0 {
            self.balances.remove(address);
        } else {
            self.balances.insert(*address, amount);
        }
        Ok(())
    }

    fn delete(&mut self, address: &Address) -> Result<(), FulError> {
        self.balances.remove(address);
        Ok(())
    }

    fn root(&self) -> Hash {
        memory_root(&self.balances)
    }

    fn commit(&mut self) -> Result<Hash, FulError> {
        let root = self.root();
        save_blob(self.store.as_ref(), &CacheKey::FulBalances(root), &self.balances)?;
        Ok(root)
    }

    fn get_all(&self) -> Result<BTreeMap<Address, u128>, FulError> {
        Ok(self.balances.clone())
    }

    fn copy(&mut self) -> Result<Box<dyn FulState>, FulError> {
        self.commit()?;
        Ok(Box::new(MemoryFulState {
            balances: self.balances.clone(),
            store: Arc::clone(&self.store),
        }))
    }
}

pub struct MemoryFulProvider {
    store: Arc<dyn KeyValueStore>,
}

impl MemoryFulProvider {
    /// Provider over a private in-memory store
    pub fn new() -> Self {
        Self::with_backing(Arc::new(MemoryStore::new()))
    }

    pub fn with_backing(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

impl Default for MemoryFulProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FulProvider for MemoryFulProvider {
    fn open(&self, root: Hash) -> Result<Box<dyn FulState>, FulError> {
        let balances = if root == self.empty_root() {
            BTreeMap::new()
        } else {
            load_blob(self.store.as_ref(), &CacheKey::FulBalances(root))?
        };
        Ok(Box::new(MemoryFulState {
            balances,
            store: Arc::clone(&self.store),
        }))
    }

    fn empty_root(&self) -> Hash {
        memory_root(&BTreeMap::new())
    }

    fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    fn with_store(&self, store: Arc<dyn KeyValueStore>) -> Box<dyn FulProvider> {
        Box::new(MemoryFulProvider::with_backing(store))
    }
}
