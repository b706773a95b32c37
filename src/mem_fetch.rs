use crate::address;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic;

/// Direction of a memory access on the pipeline.
///
/// Requests travel core -> interconnect -> DRAM; replies travel the
/// reverse path back to the core identified by `core_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    ReadRequest,
    WriteRequest,
    ReadReply,
    WriteAck,
}

static ACCESS_UID: Lazy<atomic::AtomicU64> = Lazy::new(|| atomic::AtomicU64::new(0));

/// Generate a unique ID that can be used to identify accesses in flight.
pub fn generate_uid() -> u64 {
    ACCESS_UID.fetch_add(1, atomic::Ordering::SeqCst)
}

/// A single unit of memory traffic.
///
/// Created by a core, routed through the interconnect to a DRAM channel,
/// turned into a reply there and routed back. There is exactly one live
/// holder at any time; queue boundaries take ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAccess {
    pub uid: u64,
    /// Target DRAM byte address, aligned to the atomic transfer size.
    pub addr: address,
    /// Requested bytes; must equal the DRAM atomic transfer size.
    pub size: u64,
    pub is_write: bool,
    pub kind: Kind,
    /// Issuing core, stamped by the core itself.
    pub core_id: usize,
    /// Operation this access belongs to.
    pub layer_id: u32,
    /// Tile sequence number within the operation.
    pub tile_seq: u32,
}

impl std::fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:?}(core={}, layer={}, addr={})",
            self.kind, self.core_id, self.layer_id, self.addr
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Builder {
    pub addr: address,
    pub size: u64,
    pub is_write: bool,
    pub core_id: usize,
    pub layer_id: u32,
    pub tile_seq: u32,
}

impl Builder {
    #[must_use]
    pub fn build(self) -> MemoryAccess {
        let kind = if self.is_write {
            Kind::WriteRequest
        } else {
            Kind::ReadRequest
        };
        MemoryAccess {
            uid: generate_uid(),
            addr: self.addr,
            size: self.size,
            is_write: self.is_write,
            kind,
            core_id: self.core_id,
            layer_id: self.layer_id,
            tile_seq: self.tile_seq,
        }
    }
}

impl From<Builder> for MemoryAccess {
    fn from(builder: Builder) -> Self {
        builder.build()
    }
}

impl MemoryAccess {
    /// True while the access is outbound towards memory.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self.kind, Kind::ReadRequest | Kind::WriteRequest)
    }

    #[must_use]
    pub fn is_reply(&self) -> bool {
        !self.is_request()
    }

    /// Turn the request into its reply; DRAM does this when it starts
    /// servicing the access.
    pub fn set_reply(&mut self) {
        match self.kind {
            Kind::ReadRequest => {
                debug_assert!(!self.is_write);
                self.kind = Kind::ReadReply;
            }
            Kind::WriteRequest => {
                debug_assert!(self.is_write);
                self.kind = Kind::WriteAck;
            }
            Kind::ReadReply | Kind::WriteAck => {}
        }
    }
}
