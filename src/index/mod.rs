//! Size-indexed free-block B+ tree, self-hosted in the arena it indexes.

pub mod node;
mod tree;

pub use tree::FreeIndex;

#[cfg(test)]
mod tests;
