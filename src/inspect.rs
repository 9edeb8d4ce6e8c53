//! Read-only views of the heap, for diagnostics and tests. Nothing here is
//! needed for the allocator to work.

use std::fmt;

use crate::block::BlockState;

/// Snapshot of one block of the address-order chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Index of the region the block was carved from, in acquisition order.
    pub region: usize,
    /// Address of the block header.
    pub header: usize,
    /// Address handed out to callers.
    pub payload: usize,
    /// Usable bytes, header excluded.
    pub size: usize,
    pub state: BlockState,
    /// Position in the free list, `None` for blocks in use.
    pub free_position: Option<usize>,
}

impl BlockInfo {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }

    /// Address one past the last payload byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.payload + self.size
    }

    /// Tells whether `addr` lies inside the payload.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        (self.payload..self.end()).contains(&addr)
    }
}

/// Aggregated counters over the whole heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub regions: usize,
    /// Bytes obtained from the region provider.
    pub region_bytes: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub in_use_bytes: usize,
    /// Size of the largest free block, the biggest request served without
    /// asking for a new region.
    pub largest_free: usize,
}

/// Table rendering of [`crate::MemAlloc::dump_state`].
///
/// ```text
/// region  header          payload         size      state   free
/// 0       0x7f3a9c000010  0x7f3a9c000040  512       in use  -
/// 0       0x7f3a9c000240  0x7f3a9c000270  64928     free    0
/// ```
pub struct HeapDump<'a>(pub &'a [BlockInfo]);

impl fmt::Display for HeapDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<7} {:<15} {:<15} {:<9} {:<7} free",
            "region", "header", "payload", "size", "state"
        )?;

        for block in self.0 {
            let position = match block.free_position {
                Some(position) => position.to_string(),
                None => "-".to_string(),
            };

            writeln!(
                f,
                "{:<7} {:<#15x} {:<#15x} {:<9} {:<7} {}",
                block.region,
                block.header,
                block.payload,
                block.size,
                block.state.to_string(),
                position
            )?;
        }

        Ok(())
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} region(s), {} bytes, {} block(s): {} free ({} bytes, largest {}), {} bytes in use",
            self.regions,
            self.region_bytes,
            self.blocks,
            self.free_blocks,
            self.free_bytes,
            self.largest_free,
            self.in_use_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(payload: usize, size: usize, state: BlockState) -> BlockInfo {
        BlockInfo {
            region: 0,
            header: payload - 48,
            payload,
            size,
            state,
            free_position: (state == BlockState::Free).then_some(0),
        }
    }

    #[test]
    fn payload_range() {
        let block = info(0x1000, 64, BlockState::InUse);

        assert_eq!(block.end(), 0x1040);
        assert!(block.contains(0x1000));
        assert!(block.contains(0x103f));
        assert!(!block.contains(0x1040));
        assert!(!block.is_free());
    }

    #[test]
    fn dump_has_one_line_per_block() {
        let blocks = [
            info(0x1000, 64, BlockState::InUse),
            info(0x1070, 128, BlockState::Free),
        ];

        let text = HeapDump(&blocks).to_string();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("region"));
        assert!(lines[1].contains("0x1000") && lines[1].contains("in use"));
        assert!(lines[1].ends_with('-'));
        assert!(lines[2].contains("0x1070") && lines[2].contains("free"));
        assert!(lines[2].ends_with('0'));
    }

    #[test]
    fn stats_summary() {
        let stats = HeapStats {
            regions: 1,
            region_bytes: 65536,
            blocks: 2,
            free_blocks: 1,
            free_bytes: 1000,
            in_use_bytes: 64,
            largest_free: 1000,
        };

        assert_eq!(
            stats.to_string(),
            concat!(
                "1 region(s), 65536 bytes, 2 block(s): ",
                "1 free (1000 bytes, largest 1000), 64 bytes in use"
            )
        );
    }
}
