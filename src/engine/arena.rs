//! Linear memory arena shared with the stretch engine.
//!
//! Engines address sample data by 32-bit byte offsets into one flat byte
//! space, the way a native DSP library sees its heap. Each process call
//! passes a pointer table: one little-endian `u32` address per channel,
//! each pointing at a buffer of little-endian `f32` samples.
//!
//! Allocation is a bump pointer that retracts when the topmost allocations
//! are freed. The per-chunk pattern (allocate inputs, process, free) is LIFO,
//! so the arena never fragments in practice.
//!
//! Handles carry a serial number. Freeing a handle twice, or using one after
//! its slot was reused, is detected and reported instead of corrupting data.

use crate::error::{KeyshiftError, Result};
use std::cell::RefCell;

const ALIGN: usize = 8;

/// Offsets below this are never handed out, so address 0 acts as null.
const BASE: usize = ALIGN;

const F32_BYTES: usize = 4;
const ADDRESS_BYTES: usize = 4;

/// Handle to a live region of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaAllocation {
    index: usize,
    serial: u64,
    offset: usize,
    len: usize,
}

impl ArenaAllocation {
    /// Byte address of the region, as an engine would see it.
    pub fn address(&self) -> u32 {
        self.offset as u32
    }

    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of `f32` samples the region holds.
    pub fn float_capacity(&self) -> usize {
        self.len / F32_BYTES
    }
}

/// Allocation counters, used for leak checks and debug logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub allocations: u64,
    pub frees: u64,
    pub live: usize,
    pub live_bytes: usize,
    pub high_water_bytes: usize,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: usize,
    len: usize,
    serial: u64,
}

impl Slot {
    fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Debug)]
struct ArenaInner {
    memory: Vec<u8>,
    capacity: usize,
    top: usize,
    slots: Vec<Option<Slot>>,
    next_serial: u64,
    stats: ArenaStats,
}

/// Flat byte space with explicit allocate/free.
///
/// Interior mutability lets the scheduler and the engine share one `&Arena`
/// for the duration of a call, the way they would share a native heap.
#[derive(Debug)]
pub struct Arena {
    inner: RefCell<ArenaInner>,
}

impl Arena {
    /// Creates an arena that can hand out up to `capacity` bytes.
    ///
    /// Memory is committed lazily as the bump pointer advances.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity <= BASE || capacity > u32::MAX as usize {
            return Err(KeyshiftError::invalid(
                "arena_bytes",
                format!("{} is outside the addressable range", capacity),
            ));
        }
        Ok(Self {
            inner: RefCell::new(ArenaInner {
                memory: Vec::new(),
                capacity,
                top: BASE,
                slots: Vec::new(),
                next_serial: 1,
                stats: ArenaStats::default(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity
    }

    /// Bytes below the bump pointer, including alignment padding.
    pub fn used_bytes(&self) -> usize {
        self.inner.borrow().top - BASE
    }

    pub fn stats(&self) -> ArenaStats {
        self.inner.borrow().stats
    }

    /// Number of allocations that have not been freed.
    pub fn live_allocations(&self) -> usize {
        self.inner.borrow().stats.live
    }

    /// Reserves `byte_len` bytes, 8-byte aligned and zero-filled.
    pub fn allocate(&self, byte_len: usize) -> Result<ArenaAllocation> {
        let mut inner = self.inner.borrow_mut();
        if byte_len == 0 {
            return Err(KeyshiftError::bounds("zero-length allocation"));
        }

        let offset = align_up(inner.top);
        let available = inner.capacity.saturating_sub(offset);
        if byte_len > available {
            return Err(KeyshiftError::OutOfMemory {
                requested: byte_len,
                available,
            });
        }
        let end = offset + byte_len;

        if end > inner.memory.len() {
            inner.memory.resize(end, 0);
        } else {
            inner.memory[offset..end].fill(0);
        }

        let serial = inner.next_serial;
        inner.next_serial += 1;
        let index = inner.slots.len();
        inner.slots.push(Some(Slot {
            offset,
            len: byte_len,
            serial,
        }));
        inner.top = end;

        let stats = &mut inner.stats;
        stats.allocations += 1;
        stats.live += 1;
        stats.live_bytes += byte_len;
        stats.high_water_bytes = stats.high_water_bytes.max(end - BASE);

        Ok(ArenaAllocation {
            index,
            serial,
            offset,
            len: byte_len,
        })
    }

    /// Returns a region to the arena.
    ///
    /// Fails with `DoubleFree` if the handle is no longer live.
    pub fn free(&self, allocation: ArenaAllocation) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let live = matches!(
            inner.slots.get(allocation.index),
            Some(Some(slot)) if slot.serial == allocation.serial
        );
        if !live {
            return Err(KeyshiftError::DoubleFree {
                index: allocation.index,
                serial: allocation.serial,
            });
        }

        inner.slots[allocation.index] = None;
        while matches!(inner.slots.last(), Some(None)) {
            inner.slots.pop();
        }
        inner.top = match inner.slots.last() {
            Some(Some(slot)) => slot.end(),
            _ => BASE,
        };

        let stats = &mut inner.stats;
        stats.frees += 1;
        stats.live -= 1;
        stats.live_bytes -= allocation.len;
        Ok(())
    }

    /// Finds the live allocation that starts at `address`.
    pub fn resolve(&self, address: u32) -> Result<ArenaAllocation> {
        let inner = self.inner.borrow();
        let offset = address as usize;
        let found = inner
            .slots
            .iter()
            .copied()
            .enumerate()
            .find_map(|(index, slot)| slot.filter(|s| s.offset == offset).map(|s| (index, s)));
        found
            .map(|(index, slot)| ArenaAllocation {
                index,
                serial: slot.serial,
                offset: slot.offset,
                len: slot.len,
            })
            .ok_or_else(|| {
                KeyshiftError::bounds(format!("address {:#x} is not a live allocation", address))
            })
    }

    /// Writes samples starting at float index `start` within `allocation`.
    pub fn write_floats(
        &self,
        allocation: ArenaAllocation,
        start: usize,
        samples: &[f32],
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let range = inner.checked_range(allocation, start, samples.len(), F32_BYTES)?;
        let bytes = &mut inner.memory[range];
        for (chunk, sample) in bytes.chunks_exact_mut(F32_BYTES).zip(samples) {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    /// Reads `count` samples starting at float index `start`.
    pub fn read_floats(
        &self,
        allocation: ArenaAllocation,
        start: usize,
        count: usize,
    ) -> Result<Vec<f32>> {
        let inner = self.inner.borrow();
        let range = inner.checked_range(allocation, start, count, F32_BYTES)?;
        Ok(inner.memory[range]
            .chunks_exact(F32_BYTES)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Writes a pointer table entry run starting at slot `start`.
    pub fn write_addresses(
        &self,
        allocation: ArenaAllocation,
        start: usize,
        addresses: &[u32],
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let range = inner.checked_range(allocation, start, addresses.len(), ADDRESS_BYTES)?;
        let bytes = &mut inner.memory[range];
        for (chunk, address) in bytes.chunks_exact_mut(ADDRESS_BYTES).zip(addresses) {
            chunk.copy_from_slice(&address.to_le_bytes());
        }
        Ok(())
    }

    pub fn read_addresses(
        &self,
        allocation: ArenaAllocation,
        start: usize,
        count: usize,
    ) -> Result<Vec<u32>> {
        let inner = self.inner.borrow();
        let range = inner.checked_range(allocation, start, count, ADDRESS_BYTES)?;
        Ok(inner.memory[range]
            .chunks_exact(ADDRESS_BYTES)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

impl ArenaInner {
    fn checked_range(
        &self,
        allocation: ArenaAllocation,
        start: usize,
        count: usize,
        width: usize,
    ) -> Result<std::ops::Range<usize>> {
        let live = matches!(
            self.slots.get(allocation.index),
            Some(Some(slot)) if slot.serial == allocation.serial
        );
        if !live {
            return Err(KeyshiftError::bounds(format!(
                "allocation #{} (serial {}) is not live",
                allocation.index, allocation.serial
            )));
        }

        let byte_start = start.checked_mul(width);
        let byte_end = start
            .checked_add(count)
            .and_then(|end| end.checked_mul(width));
        match (byte_start, byte_end) {
            (Some(byte_start), Some(byte_end)) if byte_end <= allocation.len => {
                Ok(allocation.offset + byte_start..allocation.offset + byte_end)
            }
            _ => Err(KeyshiftError::bounds(format!(
                "{} elements at index {} overrun a {}-byte allocation",
                count, start, allocation.len
            ))),
        }
    }
}

fn align_up(offset: usize) -> usize {
    offset.div_ceil(ALIGN) * ALIGN
}

/// Per-channel sample buffers plus the pointer table that addresses them.
///
/// Everything is freed on [`release`](Self::release), or on drop if the
/// owner bails out early with `?`.
#[derive(Debug)]
pub struct ChannelBuffers<'a> {
    arena: &'a Arena,
    table: ArenaAllocation,
    buffers: Vec<ArenaAllocation>,
    frames: usize,
    released: bool,
}

impl<'a> ChannelBuffers<'a> {
    /// Allocates `channels` buffers of `frames` samples each and fills the
    /// pointer table with their addresses.
    pub fn allocate(arena: &'a Arena, channels: usize, frames: usize) -> Result<Self> {
        let table_bytes = channels
            .checked_mul(ADDRESS_BYTES)
            .ok_or_else(|| too_large(channels, ADDRESS_BYTES))?;
        let buffer_bytes = frames
            .checked_mul(F32_BYTES)
            .ok_or_else(|| too_large(frames, F32_BYTES))?;

        let table = arena.allocate(table_bytes)?;
        let mut guard = Self {
            arena,
            table,
            buffers: Vec::with_capacity(channels),
            frames,
            released: false,
        };
        for _ in 0..channels {
            let buffer = arena.allocate(buffer_bytes)?;
            guard.buffers.push(buffer);
        }

        let addresses: Vec<u32> = guard.buffers.iter().map(|b| b.address()).collect();
        arena.write_addresses(table, 0, &addresses)?;
        Ok(guard)
    }

    /// The pointer table handed to the engine.
    pub fn table(&self) -> ArenaAllocation {
        self.table
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn write_channel(&self, channel: usize, samples: &[f32]) -> Result<()> {
        let buffer = self.buffer(channel)?;
        self.arena.write_floats(buffer, 0, samples)
    }

    pub fn read_channel(&self, channel: usize, count: usize) -> Result<Vec<f32>> {
        let buffer = self.buffer(channel)?;
        self.arena.read_floats(buffer, 0, count)
    }

    /// Reads the first `count` samples of every channel.
    pub fn read_all(&self, count: usize) -> Result<Vec<Vec<f32>>> {
        (0..self.buffers.len())
            .map(|channel| self.read_channel(channel, count))
            .collect()
    }

    /// Frees the buffers and the table.
    pub fn release(mut self) -> Result<()> {
        self.free_all()
    }

    fn buffer(&self, channel: usize) -> Result<ArenaAllocation> {
        self.buffers.get(channel).copied().ok_or_else(|| {
            KeyshiftError::bounds(format!(
                "channel {} out of range for {} buffers",
                channel,
                self.buffers.len()
            ))
        })
    }

    fn free_all(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        // Free in reverse so the bump pointer retracts on every step.
        let mut first_error = None;
        for buffer in self.buffers.drain(..).rev() {
            if let Err(e) = self.arena.free(buffer) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.arena.free(self.table) {
            first_error.get_or_insert(e);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ChannelBuffers<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.free_all() {
            tracing::error!("failed to release channel buffers: {}", e);
        }
    }
}

fn too_large(count: usize, width: usize) -> KeyshiftError {
    KeyshiftError::OutOfMemory {
        requested: count.saturating_mul(width),
        available: 0,
    }
}
