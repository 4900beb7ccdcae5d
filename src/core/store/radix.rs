// src/core/store/radix.rs

//! An immutable, edge-compressed radix tree with per-node change channels.
//!
//! This is the substrate that makes MVCC cheap: every mutation path-copies
//! from the root, so a committed write produces a structurally shared
//! successor tree while readers keep iterating their own root unaffected.
//! Each node owns a fire-once change channel; replacing a node during a
//! mutation collects its channel, and the store fires the collected set at
//! commit time. Because ancestors are copied on every mutation beneath them,
//! watching any node covers its entire subtree.

use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::watch;

/// The sending half of a node's change channel. Fired exactly once, at the
/// commit that replaces or removes the node; the value latches at `true` so
/// late subscribers observe the change immediately.
pub type ChangeSender = watch::Sender<bool>;
pub type ChangeReceiver = watch::Receiver<bool>;

fn new_change() -> ChangeSender {
    watch::channel(false).0
}

#[derive(Debug)]
struct Node<T> {
    /// The compressed edge label leading into this node.
    prefix: Vec<u8>,
    /// Full key and value, when a key terminates here.
    leaf: Option<(Vec<u8>, T)>,
    /// Children, sorted by their first label byte.
    edges: Vec<(u8, Arc<Node<T>>)>,
    change: ChangeSender,
}

impl<T: Clone> Node<T> {
    fn empty() -> Self {
        Node {
            prefix: Vec::new(),
            leaf: None,
            edges: Vec::new(),
            change: new_change(),
        }
    }

    /// A structural copy with a fresh change channel. The original keeps its
    /// channel so the commit can fire it.
    fn shallow_copy(&self) -> Self {
        Node {
            prefix: self.prefix.clone(),
            leaf: self.leaf.clone(),
            edges: self.edges.clone(),
            change: new_change(),
        }
    }

    fn edge_idx(&self, label: u8) -> Result<usize, usize> {
        self.edges.binary_search_by_key(&label, |(l, _)| *l)
    }

    fn add_edge(&mut self, label: u8, node: Arc<Node<T>>) {
        match self.edge_idx(label) {
            Ok(i) => self.edges[i] = (label, node),
            Err(i) => self.edges.insert(i, (label, node)),
        }
    }
}

fn longest_common<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A persistent radix tree. Cloning is O(1): the clone shares the root.
#[derive(Debug, Clone)]
pub struct Tree<T> {
    root: Arc<Node<T>>,
    size: usize,
}

impl<T: Clone> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Tree<T> {
    pub fn new() -> Self {
        Tree {
            root: Arc::new(Node::empty()),
            size: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Exact lookup.
    pub fn get(&self, key: &[u8]) -> Option<T> {
        let mut node = &self.root;
        let mut search = key;
        loop {
            if search.is_empty() {
                return node.leaf.as_ref().map(|(_, v)| v.clone());
            }
            let Ok(idx) = node.edge_idx(search[0]) else {
                return None;
            };
            let child = &node.edges[idx].1;
            if search.len() >= child.prefix.len() && search[..child.prefix.len()] == *child.prefix {
                search = &search[child.prefix.len()..];
                node = child;
            } else {
                return None;
            }
        }
    }

    /// Exact lookup that also reports the change channel governing the key's
    /// position: the terminating node when found, else the deepest node
    /// reached. Any later mutation of the key fires that channel, because
    /// mutations path-copy every ancestor.
    pub fn get_watch(&self, key: &[u8]) -> (Option<T>, ChangeSender) {
        let mut node = &self.root;
        let mut search = key;
        loop {
            if search.is_empty() {
                return (
                    node.leaf.as_ref().map(|(_, v)| v.clone()),
                    node.change.clone(),
                );
            }
            let Ok(idx) = node.edge_idx(search[0]) else {
                return (None, node.change.clone());
            };
            let child = &node.edges[idx].1;
            if search.len() >= child.prefix.len() && search[..child.prefix.len()] == *child.prefix {
                search = &search[child.prefix.len()..];
                node = child;
            } else {
                return (None, node.change.clone());
            }
        }
    }

    /// Inserts `key`, returning the successor tree, the displaced value, and
    /// the change channels of every node the mutation replaced.
    pub fn insert(&self, key: &[u8], value: T) -> (Tree<T>, Option<T>, Vec<ChangeSender>) {
        let mut old = None;
        let mut dirty = Vec::new();
        let new_root = insert_rec(&self.root, key, key, value, &mut old, &mut dirty);
        let size = if old.is_some() {
            self.size
        } else {
            self.size + 1
        };
        (
            Tree {
                root: new_root,
                size,
            },
            old,
            dirty,
        )
    }

    /// Deletes `key`, returning the successor tree, the removed value, and
    /// the replaced nodes' change channels. Returns the original tree shape
    /// (with no dirty channels) when the key is absent.
    pub fn delete(&self, key: &[u8]) -> (Tree<T>, Option<T>, Vec<ChangeSender>) {
        let mut old = None;
        let mut dirty = Vec::new();
        match delete_rec(&self.root, key, true, &mut old, &mut dirty) {
            Some(new_root) => (
                Tree {
                    root: new_root,
                    size: self.size - 1,
                },
                old,
                dirty,
            ),
            None => (self.clone(), None, Vec::new()),
        }
    }

    /// Iterates the whole tree in ascending key order.
    pub fn iter(&self) -> Iter<T> {
        Iter {
            stack: vec![Frame::full(self.root.clone())],
        }
    }

    /// Iterates every key starting with `prefix`, ascending.
    pub fn iter_prefix(&self, prefix: &[u8]) -> Iter<T> {
        match self.prefix_subtree(prefix) {
            Some(node) => Iter {
                stack: vec![Frame::full(node)],
            },
            None => Iter { stack: Vec::new() },
        }
    }

    /// Like [`Tree::iter_prefix`], also returning the change channel of the
    /// node governing the prefix subtree.
    pub fn iter_prefix_watch(&self, prefix: &[u8]) -> (Iter<T>, ChangeSender) {
        let (subtree, change) = self.prefix_subtree_watch(prefix);
        let iter = match subtree {
            Some(node) => Iter {
                stack: vec![Frame::full(node)],
            },
            None => Iter { stack: Vec::new() },
        };
        (iter, change)
    }

    /// Iterates every key `>= bound` in ascending order.
    pub fn iter_lower_bound(&self, bound: &[u8]) -> Iter<T> {
        let mut stack = Vec::new();
        let mut node = self.root.clone();
        let mut search = bound.to_vec();
        loop {
            let cmp_len = node.prefix.len().min(search.len());
            match node.prefix[..cmp_len].cmp(&search[..cmp_len]) {
                Ordering::Greater => {
                    // Every key under this node sorts after the bound.
                    stack.push(Frame::full(node));
                    break;
                }
                Ordering::Less => break,
                Ordering::Equal => {}
            }
            if node.prefix.len() >= search.len() {
                // The bound is exhausted inside this node's prefix, so the
                // whole subtree qualifies (the node's own key included).
                stack.push(Frame::full(node));
                break;
            }
            let rest = search[node.prefix.len()..].to_vec();
            let label = rest[0];
            // The node's own key is a proper prefix of the bound, hence
            // smaller; skip it. Queue the larger siblings so they surface
            // after the matching child is exhausted.
            for i in (0..node.edges.len()).rev() {
                if node.edges[i].0 > label {
                    stack.push(Frame::full(node.edges[i].1.clone()));
                }
            }
            match node.edge_idx(label) {
                Ok(idx) => {
                    let child = node.edges[idx].1.clone();
                    node = child;
                    search = rest;
                }
                Err(_) => break,
            }
        }
        Iter { stack }
    }

    /// Iterates every key starting with `prefix` in descending order.
    pub fn rev_iter_prefix(&self, prefix: &[u8]) -> RevIter<T> {
        match self.prefix_subtree(prefix) {
            Some(node) => RevIter {
                stack: vec![RevFrame::full(node)],
            },
            None => RevIter { stack: Vec::new() },
        }
    }

    /// Iterates every key `<= bound` in descending order.
    pub fn rev_iter_upper_bound(&self, bound: &[u8]) -> RevIter<T> {
        let mut stack = Vec::new();
        let mut node = self.root.clone();
        let mut search = bound.to_vec();
        loop {
            let cmp_len = node.prefix.len().min(search.len());
            match node.prefix[..cmp_len].cmp(&search[..cmp_len]) {
                Ordering::Less => {
                    // Every key under this node sorts before the bound.
                    stack.push(RevFrame::full(node));
                    break;
                }
                Ordering::Greater => break,
                Ordering::Equal => {}
            }
            if node.prefix.len() >= search.len() {
                if node.prefix.len() == search.len() {
                    // The node's own key equals the bound; its children are
                    // all longer, hence greater, and excluded.
                    stack.push(RevFrame::leaf_only(node));
                }
                break;
            }
            let rest = search[node.prefix.len()..].to_vec();
            let label = rest[0];
            // The node's own key is a proper prefix of the bound, hence
            // smaller: it qualifies, and surfaces last.
            stack.push(RevFrame::leaf_only(node.clone()));
            for (l, child) in node.edges.iter() {
                if *l < label {
                    stack.push(RevFrame::full(child.clone()));
                }
            }
            match node.edge_idx(label) {
                Ok(idx) => {
                    let child = node.edges[idx].1.clone();
                    node = child;
                    search = rest;
                }
                Err(_) => break,
            }
        }
        RevIter { stack }
    }

    /// The change channel of the root; fires on any committed mutation.
    pub fn root_watch(&self) -> ChangeSender {
        self.root.change.clone()
    }

    /// Locates the node whose subtree holds exactly the keys starting with
    /// `prefix`.
    fn prefix_subtree(&self, prefix: &[u8]) -> Option<Arc<Node<T>>> {
        self.prefix_subtree_watch(prefix).0
    }

    fn prefix_subtree_watch(&self, prefix: &[u8]) -> (Option<Arc<Node<T>>>, ChangeSender) {
        let mut node = self.root.clone();
        let mut search = prefix;
        loop {
            if search.is_empty() {
                let change = node.change.clone();
                return (Some(node), change);
            }
            let Ok(idx) = node.edge_idx(search[0]) else {
                return (None, node.change.clone());
            };
            let child = node.edges[idx].1.clone();
            if search.len() >= child.prefix.len() {
                if search[..child.prefix.len()] == *child.prefix {
                    search = &search[child.prefix.len()..];
                    node = child;
                } else {
                    return (None, node.change.clone());
                }
            } else if child.prefix[..search.len()] == *search {
                // The prefix ends inside the child's edge: the child's whole
                // subtree matches.
                let change = child.change.clone();
                return (Some(child), change);
            } else {
                return (None, node.change.clone());
            }
        }
    }
}

fn insert_rec<T: Clone>(
    node: &Arc<Node<T>>,
    search: &[u8],
    full_key: &[u8],
    value: T,
    old: &mut Option<T>,
    dirty: &mut Vec<ChangeSender>,
) -> Arc<Node<T>> {
    // This node is replaced by a copy, so its watchers must fire at commit.
    dirty.push(node.change.clone());

    if search.is_empty() {
        let mut copy = node.shallow_copy();
        if let Some((_, v)) = &copy.leaf {
            *old = Some(v.clone());
        }
        copy.leaf = Some((full_key.to_vec(), value));
        return Arc::new(copy);
    }

    let Ok(idx) = node.edge_idx(search[0]) else {
        // No edge: attach a fresh leaf node holding the remaining bytes.
        let mut copy = node.shallow_copy();
        copy.add_edge(
            search[0],
            Arc::new(Node {
                prefix: search.to_vec(),
                leaf: Some((full_key.to_vec(), value)),
                edges: Vec::new(),
                change: new_change(),
            }),
        );
        return Arc::new(copy);
    };

    let child = node.edges[idx].1.clone();
    let common = longest_common(search, &child.prefix);
    if common == child.prefix.len() {
        let new_child = insert_rec(&child, &search[common..], full_key, value, old, dirty);
        let mut copy = node.shallow_copy();
        copy.edges[idx].1 = new_child;
        return Arc::new(copy);
    }

    // Split the child's edge at the divergence point.
    dirty.push(child.change.clone());
    let mut splitter = Node {
        prefix: search[..common].to_vec(),
        leaf: None,
        edges: Vec::new(),
        change: new_change(),
    };
    let trimmed_child = Node {
        prefix: child.prefix[common..].to_vec(),
        leaf: child.leaf.clone(),
        edges: child.edges.clone(),
        change: new_change(),
    };
    let trimmed_label = trimmed_child.prefix[0];
    splitter.add_edge(trimmed_label, Arc::new(trimmed_child));

    let rest = &search[common..];
    if rest.is_empty() {
        splitter.leaf = Some((full_key.to_vec(), value));
    } else {
        splitter.add_edge(
            rest[0],
            Arc::new(Node {
                prefix: rest.to_vec(),
                leaf: Some((full_key.to_vec(), value)),
                edges: Vec::new(),
                change: new_change(),
            }),
        );
    }

    let mut copy = node.shallow_copy();
    copy.edges[idx].1 = Arc::new(splitter);
    Arc::new(copy)
}

/// Returns the replacement node, or `None` when the key was absent and the
/// subtree is unchanged.
fn delete_rec<T: Clone>(
    node: &Arc<Node<T>>,
    search: &[u8],
    is_root: bool,
    old: &mut Option<T>,
    dirty: &mut Vec<ChangeSender>,
) -> Option<Arc<Node<T>>> {
    if search.is_empty() {
        let (_, v) = node.leaf.as_ref()?;
        *old = Some(v.clone());
        dirty.push(node.change.clone());
        let mut copy = node.shallow_copy();
        copy.leaf = None;
        if !is_root && copy.edges.len() == 1 {
            merge_child(&mut copy, dirty);
        }
        return Some(Arc::new(copy));
    }

    let idx = node.edge_idx(search[0]).ok()?;
    let child = node.edges[idx].1.clone();
    if search.len() < child.prefix.len() || search[..child.prefix.len()] != *child.prefix {
        return None;
    }
    let new_child = delete_rec(&child, &search[child.prefix.len()..], false, old, dirty)?;

    dirty.push(node.change.clone());
    let mut copy = node.shallow_copy();
    if new_child.leaf.is_none() && new_child.edges.is_empty() {
        copy.edges.remove(idx);
        if !is_root && copy.leaf.is_none() && copy.edges.len() == 1 {
            merge_child(&mut copy, dirty);
        }
    } else {
        copy.edges[idx].1 = new_child;
    }
    Some(Arc::new(copy))
}

/// Absorbs a node's only child, concatenating edge labels. The child node
/// disappears as an addressable position, so its watchers fire.
fn merge_child<T: Clone>(node: &mut Node<T>, dirty: &mut Vec<ChangeSender>) {
    let (_, child) = node.edges.remove(0);
    dirty.push(child.change.clone());
    node.prefix.extend_from_slice(&child.prefix);
    node.leaf = child.leaf.clone();
    node.edges = child.edges.clone();
}

// --- Iterators ---

struct Frame<T> {
    node: Arc<Node<T>>,
    leaf_done: bool,
    next_edge: usize,
}

impl<T> Frame<T> {
    fn full(node: Arc<Node<T>>) -> Self {
        Frame {
            node,
            leaf_done: false,
            next_edge: 0,
        }
    }
}

/// Lazy ascending iterator over a snapshot of the tree. Not restartable.
pub struct Iter<T> {
    stack: Vec<Frame<T>>,
}

impl<T: Clone> Iterator for Iter<T> {
    type Item = (Vec<u8>, T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.last_mut() {
            if !frame.leaf_done {
                frame.leaf_done = true;
                if let Some((k, v)) = &frame.node.leaf {
                    return Some((k.clone(), v.clone()));
                }
            }
            if frame.next_edge < frame.node.edges.len() {
                let child = frame.node.edges[frame.next_edge].1.clone();
                frame.next_edge += 1;
                self.stack.push(Frame::full(child));
            } else {
                self.stack.pop();
            }
        }
        None
    }
}

struct RevFrame<T> {
    node: Arc<Node<T>>,
    leaf_done: bool,
    /// Edges still to visit, walked back-to-front. Zero skips children.
    remaining_edges: usize,
}

impl<T> RevFrame<T> {
    fn full(node: Arc<Node<T>>) -> Self {
        let remaining_edges = node.edges.len();
        RevFrame {
            node,
            leaf_done: false,
            remaining_edges,
        }
    }

    fn leaf_only(node: Arc<Node<T>>) -> Self {
        RevFrame {
            node,
            leaf_done: false,
            remaining_edges: 0,
        }
    }
}

/// Lazy descending iterator over a snapshot of the tree. Not restartable.
pub struct RevIter<T> {
    stack: Vec<RevFrame<T>>,
}

impl<T: Clone> Iterator for RevIter<T> {
    type Item = (Vec<u8>, T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(frame) = self.stack.last_mut() {
            if frame.remaining_edges > 0 {
                frame.remaining_edges -= 1;
                let child = frame.node.edges[frame.remaining_edges].1.clone();
                self.stack.push(RevFrame::full(child));
                continue;
            }
            if !frame.leaf_done {
                frame.leaf_done = true;
                if let Some((k, v)) = &frame.node.leaf {
                    return Some((k.clone(), v.clone()));
                }
            }
            self.stack.pop();
        }
        None
    }
}
