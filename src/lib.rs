/*! # About
`acid_map` is an ordered associative container, a sorted map from keys to values backed by a
self-balancing AVL tree. Its defining feature is live iterator stability: a cursor taken from the
map stays valid across later insertions and erasures on that same map, including erasure of the
very entry it refers to, without ever dangling.

This crate grew out of an exploration of classical data structures and algorithms in Rust; this
particular corner of that exploration — trees and the maps built on top of them — is the part that
survived into a focused library.

# Hierarchies
The tree itself, independent of any key/value framing.

- [AVL tree](crate::hierarchies::avl_tree): An arena-backed, self-balancing binary search tree.
  Deletions are logical (tombstoned) rather than physical until every outstanding cursor referring
  to a node has released it, which is what makes the cursors above stable in the first place.

# Associative
The map built on top of the tree core.

- [Tree map](crate::associative::avl_tree_map): A sorted `K -> V` map ordered on `K` alone, with
  `insert`/`emplace`/`try_emplace` insertion modes, `entry`-style indexed access, and cursors that
  survive structural mutation.
*/

pub mod hierarchies {
    pub mod avl_tree;
}
pub mod associative {
    pub mod avl_tree_map;
}
