// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - MERKLE-PATRICIA TRIE
//
// Authenticated key→value map over the opaque store. Nodes are bincode
// encoded, hashed with Keccak-256 and stored under their hash, so any
// committed root can be reopened later and two tries sharing history share
// their unchanged nodes. Nothing is ever deleted from the store.
//
// Uncommitted edits live inline in memory; `commit` writes them out bottom-up.
// The root hash only depends on the key→value contents, never on the order
// the edits were made in.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::store::{load_blob, save_blob, CacheKey, KeyValueStore, StoreError};
use crate::{keccak256, Hash};

/// Root hash of a trie with no entries
pub fn empty_root() -> Hash {
    keccak256(&[])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum NodeRef {
    Hash(Hash),
    Inline(Box<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Node {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Extension {
        path: Vec<u8>,
        child: NodeRef,
    },
    Branch {
        children: [Option<NodeRef>; 16],
        value: Option<Vec<u8>>,
    },
}

fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() * 2);
    for b in key {
        out.push(b >> 4);
        out.push(b & 0x0f);
    }
    out
}

fn from_nibbles(nibbles: &[u8]) -> Vec<u8> {
    nibbles.chunks(2).map(|p| (p[0] << 4) | p.get(1).copied().unwrap_or(0)).collect()
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

fn inline(node: Node) -> NodeRef {
    NodeRef::Inline(Box::new(node))
}

fn empty_children() -> [Option<NodeRef>; 16] {
    Default::default()
}

/// Put `value` at `rest` below a fresh branch
fn place(children: &mut [Option<NodeRef>; 16], branch_value: &mut Option<Vec<u8>>, rest: &[u8], value: Vec<u8>) {
    match rest.split_first() {
        None => *branch_value = Some(value),
        Some((first, tail)) => {
            children[*first as usize] = Some(inline(Node::Leaf {
                path: tail.to_vec(),
                value,
            }))
        }
    }
}

fn wrap_extension(path: &[u8], node: Node) -> NodeRef {
    if path.is_empty() {
        inline(node)
    } else {
        inline(Node::Extension {
            path: path.to_vec(),
            child: inline(node),
        })
    }
}

pub struct Trie {
    root: Option<NodeRef>,
    store: Arc<dyn KeyValueStore>,
}

impl Clone for Trie {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl Trie {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { root: None, store }
    }

    /// Reopen a committed trie. Fails with NotFound if the root node is absent.
    pub fn open(store: Arc<dyn KeyValueStore>, root: Hash) -> Result<Self, StoreError> {
        if root == empty_root() {
            return Ok(Self::new(store));
        }
        let trie = Self {
            root: Some(NodeRef::Hash(root)),
            store,
        };
        trie.resolve(&NodeRef::Hash(root))?;
        Ok(trie)
    }

    pub fn store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.store)
    }

    fn resolve(&self, r: &NodeRef) -> Result<Node, StoreError> {
        match r {
            NodeRef::Inline(node) => Ok((**node).clone()),
            NodeRef::Hash(hash) => load_blob(self.store.as_ref(), &CacheKey::TrieNode(*hash)),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // READS
    // ─────────────────────────────────────────────────────────────

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let nibbles = to_nibbles(key);
        let mut path: &[u8] = &nibbles;
        let mut current = match &self.root {
            Some(r) => self.resolve(r)?,
            None => return Ok(None),
        };
        loop {
            match current {
                Node::Leaf { path: lp, value } => {
                    return Ok(if lp == path { Some(value) } else { None });
                }
                Node::Extension { path: ep, child } => {
                    if !path.starts_with(&ep) {
                        return Ok(None);
                    }
                    path = &path[ep.len()..];
                    current = self.resolve(&child)?;
                }
                Node::Branch { children, value } => match path.split_first() {
                    None => return Ok(value),
                    Some((first, tail)) => match &children[*first as usize] {
                        Some(child) => {
                            current = self.resolve(child)?;
                            path = tail;
                        }
                        None => return Ok(None),
                    },
                },
            }
        }
    }

    /// Every entry in ascending key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            self.collect(root, Vec::new(), &mut out)?;
        }
        Ok(out)
    }

    fn collect(
        &self,
        r: &NodeRef,
        prefix: Vec<u8>,
        out: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<(), StoreError> {
        match self.resolve(r)? {
            Node::Leaf { path, value } => {
                out.push((from_nibbles(&concat(&prefix, &path)), value));
            }
            Node::Extension { path, child } => {
                self.collect(&child, concat(&prefix, &path), out)?;
            }
            Node::Branch { children, value } => {
                if let Some(v) = value {
                    out.push((from_nibbles(&prefix), v));
                }
                for (i, child) in children.iter().enumerate() {
                    if let Some(c) = child {
                        self.collect(c, concat(&prefix, &[i as u8]), out)?;
                    }
                }
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // WRITES
    // ─────────────────────────────────────────────────────────────

    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        let nibbles = to_nibbles(key);
        let root = self.root.take();
        match self.insert_at(root.clone(), &nibbles, value) {
            Ok(new_root) => {
                self.root = Some(new_root);
                Ok(())
            }
            Err(e) => {
                self.root = root;
                Err(e)
            }
        }
    }

    fn insert_at(&self, node: Option<NodeRef>, path: &[u8], value: Vec<u8>) -> Result<NodeRef, StoreError> {
        let node = match node {
            None => {
                return Ok(inline(Node::Leaf {
                    path: path.to_vec(),
                    value,
                }))
            }
            Some(r) => self.resolve(&r)?,
        };
        match node {
            Node::Leaf { path: lp, value: lv } => {
                if lp == path {
                    return Ok(inline(Node::Leaf {
                        path: lp,
                        value,
                    }));
                }
                let common = common_prefix(&lp, path);
                let mut children = empty_children();
                let mut branch_value = None;
                place(&mut children, &mut branch_value, &lp[common..], lv);
                place(&mut children, &mut branch_value, &path[common..], value);
                Ok(wrap_extension(
                    &path[..common],
                    Node::Branch {
                        children,
                        value: branch_value,
                    },
                ))
            }
            Node::Extension { path: ep, child } => {
                let common = common_prefix(&ep, path);
                if common == ep.len() {
                    let child = self.insert_at(Some(child), &path[common..], value)?;
                    return Ok(inline(Node::Extension { path: ep, child }));
                }
                let mut children = empty_children();
                let mut branch_value = None;
                let rest = &ep[common + 1..];
                children[ep[common] as usize] = Some(if rest.is_empty() {
                    child
                } else {
                    inline(Node::Extension {
                        path: rest.to_vec(),
                        child,
                    })
                });
                place(&mut children, &mut branch_value, &path[common..], value);
                Ok(wrap_extension(
                    &path[..common],
                    Node::Branch {
                        children,
                        value: branch_value,
                    },
                ))
            }
            Node::Branch {
                mut children,
                value: bv,
            } => match path.split_first() {
                None => Ok(inline(Node::Branch {
                    children,
                    value: Some(value),
                })),
                Some((first, tail)) => {
                    let idx = *first as usize;
                    let child = self.insert_at(children[idx].take(), tail, value)?;
                    children[idx] = Some(child);
                    Ok(inline(Node::Branch { children, value: bv }))
                }
            },
        }
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool, StoreError> {
        let root = match &self.root {
            Some(r) => r.clone(),
            None => return Ok(false),
        };
        let (new_root, removed) = self.remove_at(root, &to_nibbles(key))?;
        if removed {
            self.root = new_root;
        }
        Ok(removed)
    }

    fn remove_at(&self, r: NodeRef, path: &[u8]) -> Result<(Option<NodeRef>, bool), StoreError> {
        match self.resolve(&r)? {
            Node::Leaf { path: lp, .. } => {
                if lp == path {
                    Ok((None, true))
                } else {
                    Ok((Some(r), false))
                }
            }
            Node::Extension { path: ep, child } => {
                if !path.starts_with(&ep) {
                    return Ok((Some(r), false));
                }
                let (new_child, removed) = self.remove_at(child, &path[ep.len()..])?;
                if !removed {
                    return Ok((Some(r), false));
                }
                match new_child {
                    None => Ok((None, true)),
                    Some(c) => Ok((Some(self.join_extension(&ep, c)?), true)),
                }
            }
            Node::Branch {
                mut children,
                mut value,
            } => {
                match path.split_first() {
                    None => {
                        if value.take().is_none() {
                            return Ok((Some(r), false));
                        }
                    }
                    Some((first, tail)) => {
                        let idx = *first as usize;
                        let child = match children[idx].take() {
                            Some(c) => c,
                            None => return Ok((Some(r), false)),
                        };
                        let (new_child, removed) = self.remove_at(child, tail)?;
                        if !removed {
                            return Ok((Some(r), false));
                        }
                        children[idx] = new_child;
                    }
                }
                Ok((self.collapse_branch(children, value)?, true))
            }
        }
    }

    /// Prefix `path` onto `child`, merging with a leaf or extension below
    fn join_extension(&self, path: &[u8], child: NodeRef) -> Result<NodeRef, StoreError> {
        match self.resolve(&child)? {
            Node::Leaf { path: cp, value } => Ok(inline(Node::Leaf {
                path: concat(path, &cp),
                value,
            })),
            Node::Extension { path: cp, child: grand } => Ok(inline(Node::Extension {
                path: concat(path, &cp),
                child: grand,
            })),
            Node::Branch { .. } => Ok(inline(Node::Extension {
                path: path.to_vec(),
                child,
            })),
        }
    }

    /// A branch left with a single occupant turns into a leaf or extension
    fn collapse_branch(
        &self,
        mut children: [Option<NodeRef>; 16],
        value: Option<Vec<u8>>,
    ) -> Result<Option<NodeRef>, StoreError> {
        let occupied: Vec<usize> = (0..16).filter(|i| children[*i].is_some()).collect();
        match (occupied.len(), value) {
            (0, None) => Ok(None),
            (0, Some(v)) => Ok(Some(inline(Node::Leaf {
                path: Vec::new(),
                value: v,
            }))),
            (1, None) => {
                let idx = occupied[0];
                match children[idx].take() {
                    Some(child) => Ok(Some(self.join_extension(&[idx as u8], child)?)),
                    None => Ok(None),
                }
            }
            (_, value) => Ok(Some(inline(Node::Branch { children, value }))),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // HASHING & COMMIT
    // ─────────────────────────────────────────────────────────────

    pub fn root_hash(&self) -> Hash {
        match &self.root {
            None => empty_root(),
            Some(r) => hash_ref(r),
        }
    }

    /// Write every uncommitted node to the store and return the new root
    pub fn commit(&mut self) -> Result<Hash, StoreError> {
        let root = match &self.root {
            None => return Ok(empty_root()),
            Some(r) => r.clone(),
        };
        let hash = self.commit_ref(&root)?;
        self.root = Some(NodeRef::Hash(hash));
        Ok(hash)
    }

    fn commit_ref(&self, r: &NodeRef) -> Result<Hash, StoreError> {
        let node = match r {
            NodeRef::Hash(hash) => return Ok(*hash),
            NodeRef::Inline(node) => node,
        };
        let stored = match node.as_ref() {
            Node::Leaf { .. } => (**node).clone(),
            Node::Extension { path, child } => Node::Extension {
                path: path.clone(),
                child: NodeRef::Hash(self.commit_ref(child)?),
            },
            Node::Branch { children, value } => {
                let mut hashed = empty_children();
                for (i, child) in children.iter().enumerate() {
                    if let Some(c) = child {
                        hashed[i] = Some(NodeRef::Hash(self.commit_ref(c)?));
                    }
                }
                Node::Branch {
                    children: hashed,
                    value: value.clone(),
                }
            }
        };
        let hash = hash_stored(&stored);
        save_blob(self.store.as_ref(), &CacheKey::TrieNode(hash), &stored)?;
        Ok(hash)
    }
}

fn hash_stored(node: &Node) -> Hash {
    keccak256(&bincode::serialize(node).unwrap_or_default())
}

fn hash_ref(r: &NodeRef) -> Hash {
    match r {
        NodeRef::Hash(hash) => *hash,
        NodeRef::Inline(node) => {
            let stored = match node.as_ref() {
                Node::Leaf { .. } => (**node).clone(),
                Node::Extension { path, child } => Node::Extension {
                    path: path.clone(),
                    child: NodeRef::Hash(hash_ref(child)),
                },
                Node::Branch { children, value } => {
                    let mut hashed = empty_children();
                    for (i, child) in children.iter().enumerate() {
                        if let Some(c) = child {
                            hashed[i] = Some(NodeRef::Hash(hash_ref(c)));
                        }
                    }
                    Node::Branch {
                        children: hashed,
                        value: value.clone(),
                    }
                }
            };
            hash_stored(&stored)
        }
    }
}
