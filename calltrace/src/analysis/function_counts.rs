//! Per-function call counts
//!
//! Turns a [`CounterSnapshot`] (call site address → count) into counts per
//! function. Many addresses can land in the same function (one counter per
//! few bytes of code, several call sites per function), so counts are
//! summed by [`SymbolKey`] after resolution.
//!
//! Aggregation commutes with merging: aggregating two snapshots and merging
//! the results gives the same counts as merging the snapshots first.

use std::collections::HashMap;

use super::count_table::CounterSnapshot;
use crate::symbolization::{Resolution, SymbolKey, SymbolResolver};

/// Call count of one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCount {
    pub symbol: Resolution,
    pub count: u64,
}

/// Counts summed per function
#[derive(Debug, Clone, Default)]
pub struct FunctionCounts {
    functions: HashMap<SymbolKey, FunctionCount>,
    total: u64,
}

impl FunctionCounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` calls of `symbol`
    pub fn record(&mut self, symbol: Resolution, count: u64) {
        self.total = self.total.saturating_add(count);
        self.functions
            .entry(symbol.key())
            .and_modify(|entry| entry.count = entry.count.saturating_add(count))
            .or_insert(FunctionCount { symbol, count });
    }

    /// Sum another aggregate into this one
    pub fn merge(&mut self, other: &Self) {
        for entry in other.functions.values() {
            self.record(entry.symbol.clone(), entry.count);
        }
    }

    #[must_use]
    pub fn get(&self, key: &SymbolKey) -> Option<u64> {
        self.functions.get(key).map(|entry| entry.count)
    }

    /// Total calls across all functions
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Functions sorted by count (descending), then name
    #[must_use]
    pub fn sorted(&self) -> Vec<&FunctionCount> {
        let mut entries: Vec<&FunctionCount> = self.functions.values().collect();
        entries.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.symbol.name().cmp(b.symbol.name()))
                .then_with(|| a.symbol.key().cmp(&b.symbol.key()))
        });
        entries
    }
}

/// Resolve and sum a snapshot's counts per function
pub fn aggregate_counts(snapshot: &CounterSnapshot, resolver: &SymbolResolver) -> FunctionCounts {
    let mut counts = FunctionCounts::new();
    for (address, count) in snapshot.iter() {
        counts.record(resolver.resolve(address), count);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CountTableLayout;
    use crate::symbolization::{Mapping, ModuleSymbols, ProcMaps, SymbolCache, SymbolEntry, TableLoader};
    use std::sync::Arc;

    const MODULE: &str = "/tmp/prog";

    fn resolver() -> SymbolResolver {
        let maps = ProcMaps::from_mappings(vec![Mapping {
            start: 0x40_0000,
            end: 0x40_1000,
            file_offset: 0,
            path: Arc::from(MODULE),
        }]);
        let loader = TableLoader::new().with_module(
            MODULE,
            ModuleSymbols::new(vec![
                SymbolEntry::new(0x100, "parse", "p.c", 1),
                SymbolEntry::new(0x200, "emit", "e.c", 2),
            ]),
        );
        SymbolResolver::new(Arc::new(maps), Arc::new(SymbolCache::new(loader)))
    }

    fn snapshot(pairs: &[(u64, u64)]) -> CounterSnapshot {
        let mut table = CounterSnapshot::new(CountTableLayout::RUNTIME_DEFAULT);
        for &(address, count) in pairs {
            table.add(address, count);
        }
        table
    }

    #[test]
    fn test_call_sites_sum_per_function() {
        let counts = aggregate_counts(&snapshot(&[(0x40_0100, 2), (0x40_0180, 3), (0x40_0200, 4)]), &resolver());
        let sorted = counts.sorted();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].symbol.name(), "parse");
        assert_eq!(sorted[0].count, 5);
        assert_eq!(sorted[1].count, 4);
        assert_eq!(counts.total(), 9);
    }

    #[test]
    fn test_ties_sorted_by_name() {
        let counts = aggregate_counts(&snapshot(&[(0x40_0100, 1), (0x40_0200, 1)]), &resolver());
        let names: Vec<_> = counts.sorted().iter().map(|c| c.symbol.name().to_string()).collect();
        assert_eq!(names, ["emit", "parse"]);
    }

    #[test]
    fn test_record_saturates() {
        let mut counts = FunctionCounts::new();
        let parse = resolver().resolve(0x40_0100);
        counts.record(parse.clone(), u64::MAX);
        counts.record(parse.clone(), 3);
        counts.record(resolver().resolve(0x40_0200), 1);
        assert_eq!(counts.get(&parse.key()), Some(u64::MAX));
        assert_eq!(counts.total(), u64::MAX);

        let copy = counts.clone();
        counts.merge(&copy);
        assert_eq!(counts.total(), u64::MAX);
    }

    #[test]
    fn test_unmapped_addresses_kept_separately() {
        let counts = aggregate_counts(&snapshot(&[(0x10, 1), (0x20, 1)]), &resolver());
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_aggregation_commutes_with_merge() {
        let r = resolver();
        let a = snapshot(&[(0x40_0100, 2), (0x40_0200, 1), (0x90, 4)]);
        let b = snapshot(&[(0x40_0108, 5), (0x90, 1)]);

        let mut merged_first = a.clone();
        merged_first.merge(&b).unwrap();
        let left = aggregate_counts(&merged_first, &r);

        let mut right = aggregate_counts(&a, &r);
        right.merge(&aggregate_counts(&b, &r));

        assert_eq!(left.total(), right.total());
        assert_eq!(left.len(), right.len());
        for entry in left.sorted() {
            assert_eq!(right.get(&entry.symbol.key()), Some(entry.count));
        }
    }
}
