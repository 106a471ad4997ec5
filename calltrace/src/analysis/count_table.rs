//! Call-count tables recorded in counting mode
//!
//! The runtime keeps a sparse multi-level table indexed by call-site
//! address, like a page table: each inner level consumes `page_bits` bits
//! of the address, and a leaf holds one counter per `granularity` bytes of
//! code. The `FUNCOUNT` payload is that table serialized in preorder:
//!
//! ```text
//! header:  page_bits u64 | depth u64 | granularity u64
//! node:    tag u64 (0 = inner, 1 = leaf) | n u64 | n x entry
//! entry:   inner: slot u64 | node
//!          leaf:  slot u64 | count u64
//! ```
//!
//! The parser walks the stream with an explicit stack, so a hostile
//! payload cannot recurse deeper than the declared depth.

use calltrace_common::{COUNT_HEADER_LEN, COUNT_NODE_INNER, COUNT_NODE_LEAF};
use std::collections::BTreeMap;

use crate::domain::FormatError;

/// Shape of a count table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountTableLayout {
    /// Address bits indexed per level
    pub page_bits: u32,
    /// Number of levels including the leaf level
    pub depth: u32,
    /// Bytes of code sharing one counter
    pub granularity: u64,
}

impl CountTableLayout {
    /// Layout used by the runtime: 3 levels of 16 bits, a counter per 8 bytes
    pub const RUNTIME_DEFAULT: Self = Self { page_bits: 16, depth: 3, granularity: 8 };

    fn validate(self) -> Result<Self, FormatError> {
        let bad = |reason: String| Err(FormatError::BadCounterTable(reason));
        if self.page_bits == 0 || self.page_bits > 32 {
            return bad(format!("page_bits {} out of range", self.page_bits));
        }
        if self.depth == 0 || self.depth.checked_mul(self.page_bits).map_or(true, |bits| bits > 64) {
            return bad(format!("depth {} out of range for page_bits {}", self.depth, self.page_bits));
        }
        if !self.granularity.is_power_of_two() || self.granularity > self.inner_slots() {
            return bad(format!("bad granularity {}", self.granularity));
        }
        Ok(self)
    }

    fn inner_slots(self) -> u64 {
        1u64 << self.page_bits
    }

    fn leaf_slots(self) -> u64 {
        self.inner_slots() / self.granularity
    }

    fn page_mask(self) -> u64 {
        self.inner_slots() - 1
    }
}

/// Sparse address → call count map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    layout: CountTableLayout,
    counts: BTreeMap<u64, u64>,
}

struct NodeCursor {
    prefix: u64,
    level: u32,
    remaining: u64,
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u64(&mut self) -> Result<u64, FormatError> {
        let bytes = self
            .data
            .get(self.pos..self.pos + 8)
            .ok_or_else(|| FormatError::BadCounterTable(format!("truncated at byte {}", self.pos)))?;
        self.pos += 8;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(word))
    }
}

impl CounterSnapshot {
    #[must_use]
    pub fn new(layout: CountTableLayout) -> Self {
        Self { layout, counts: BTreeMap::new() }
    }

    /// Parse a `FUNCOUNT` payload
    ///
    /// # Errors
    /// `FormatError::BadCounterTable` for an invalid layout, a node tag that
    /// doesn't fit its level, an out-of-range slot, a truncated stream or
    /// trailing bytes.
    pub fn parse_table(payload: &[u8]) -> Result<Self, FormatError> {
        if payload.len() < COUNT_HEADER_LEN {
            return Err(FormatError::BadCounterTable(format!(
                "{} byte payload is shorter than the header",
                payload.len()
            )));
        }
        let mut reader = Reader { data: payload, pos: 0 };
        let page_bits = u32::try_from(reader.u64()?).unwrap_or(u32::MAX);
        let depth = u32::try_from(reader.u64()?).unwrap_or(u32::MAX);
        let granularity = reader.u64()?;
        let layout = CountTableLayout { page_bits, depth, granularity }.validate()?;

        let mut table = Self::new(layout);
        let mut stack = vec![Self::read_node_header(&mut reader, layout, 0, 0)?];

        while let Some(node) = stack.last_mut() {
            if node.remaining == 0 {
                stack.pop();
                continue;
            }
            node.remaining -= 1;
            let (prefix, level) = (node.prefix, node.level);

            let slot = reader.u64()?;
            if level + 1 == layout.depth {
                if slot >= layout.leaf_slots() {
                    return Err(FormatError::BadCounterTable(format!("leaf slot {slot} out of range")));
                }
                let count = reader.u64()?;
                if count > 0 {
                    let address = (prefix << layout.page_bits) | (slot * layout.granularity);
                    let cell = table.counts.entry(address).or_default();
                    *cell = cell.saturating_add(count);
                }
            } else {
                if slot >= layout.inner_slots() {
                    return Err(FormatError::BadCounterTable(format!("slot {slot} out of range")));
                }
                let child_prefix = (prefix << layout.page_bits) | slot;
                stack.push(Self::read_node_header(&mut reader, layout, level + 1, child_prefix)?);
            }
        }

        if reader.pos != payload.len() {
            return Err(FormatError::BadCounterTable(format!(
                "{} trailing bytes",
                payload.len() - reader.pos
            )));
        }
        Ok(table)
    }

    fn read_node_header(
        reader: &mut Reader<'_>,
        layout: CountTableLayout,
        level: u32,
        prefix: u64,
    ) -> Result<NodeCursor, FormatError> {
        let tag = reader.u64()?;
        let is_leaf_level = level + 1 == layout.depth;
        let (expected, slots) = if is_leaf_level {
            (COUNT_NODE_LEAF, layout.leaf_slots())
        } else {
            (COUNT_NODE_INNER, layout.inner_slots())
        };
        if tag != expected {
            return Err(FormatError::BadCounterTable(format!(
                "node tag {tag} at level {level}, expected {expected}"
            )));
        }
        let remaining = reader.u64()?;
        if remaining > slots {
            return Err(FormatError::BadCounterTable(format!(
                "{remaining} entries in a node of {slots} slots"
            )));
        }
        Ok(NodeCursor { prefix, level, remaining })
    }

    /// Serialize into a `FUNCOUNT` payload
    ///
    /// Addresses beyond the table's `depth * page_bits` bits are dropped.
    #[must_use]
    pub fn to_table_bytes(&self) -> Vec<u8> {
        let layout = self.layout;
        let mut out = Vec::new();
        for word in [u64::from(layout.page_bits), u64::from(layout.depth), layout.granularity] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        let total_bits = layout.depth * layout.page_bits;
        let entries: Vec<(u64, u64)> = self
            .counts
            .iter()
            .map(|(&a, &c)| (a, c))
            .filter(|&(a, _)| total_bits >= 64 || a >> total_bits == 0)
            .collect();
        self.write_node(&mut out, 0, &entries);
        out
    }

    fn write_node(&self, out: &mut Vec<u8>, level: u32, entries: &[(u64, u64)]) {
        let layout = self.layout;
        let push = |out: &mut Vec<u8>, word: u64| out.extend_from_slice(&word.to_le_bytes());

        if level + 1 == layout.depth {
            push(out, COUNT_NODE_LEAF);
            push(out, entries.len() as u64);
            for &(address, count) in entries {
                push(out, (address & layout.page_mask()) / layout.granularity);
                push(out, count);
            }
            return;
        }

        let shift = layout.page_bits * (layout.depth - 1 - level);
        let slot_of = |address: u64| (address >> shift) & layout.page_mask();
        let groups: Vec<&[(u64, u64)]> = entries.chunk_by(|a, b| slot_of(a.0) == slot_of(b.0)).collect();

        push(out, COUNT_NODE_INNER);
        push(out, groups.len() as u64);
        for group in groups {
            push(out, slot_of(group[0].0));
            self.write_node(out, level + 1, group);
        }
    }

    /// Add `count` calls at `address`, bucketed to the table granularity
    pub fn add(&mut self, address: u64, count: u64) {
        if count == 0 {
            return;
        }
        let bucket = address - address % self.layout.granularity;
        let cell = self.counts.entry(bucket).or_default();
        *cell = cell.saturating_add(count);
    }

    /// Sum another snapshot into this one
    ///
    /// # Errors
    /// `FormatError::BadCounterTable` if the layouts differ.
    pub fn merge(&mut self, other: &Self) -> Result<(), FormatError> {
        if self.layout != other.layout {
            return Err(FormatError::BadCounterTable(format!(
                "cannot merge tables with layouts {:?} and {:?}",
                self.layout, other.layout
            )));
        }
        for (&address, &count) in &other.counts {
            let cell = self.counts.entry(address).or_default();
            *cell = cell.saturating_add(count);
        }
        Ok(())
    }

    #[must_use]
    pub fn layout(&self) -> CountTableLayout {
        self.layout
    }

    #[must_use]
    pub fn get(&self, address: u64) -> u64 {
        self.counts.get(&address).copied().unwrap_or(0)
    }

    /// Non-zero counts in address order
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.counts.iter().map(|(&a, &c)| (a, c))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0, |total, &count| total.saturating_add(count))
    }
}
