//! Row-to-tree materialization.
//!
//! The demultiplexer turns sorted join rows into feature nodes held in an
//! arena, the reassembler links part-of compositions, and the arena hands
//! finished trees out as documents.

mod arena;
mod codes;
mod demux;
mod hierarchy;

pub use arena::{FeatureArena, FeatureNode, NodeIndex, Slot, SlotRef};
pub use codes::{split_codes, CODE_DELIMITER};
pub use demux::{
    Deferred, DemuxEnv, DemuxOutput, Demultiplexer, Root, RootSlot, EXTERNAL_REFERENCE,
};
pub use hierarchy::{HierarchyReassembler, InFlight};
