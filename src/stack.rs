//! Stack id → address list, address → method, and the sequence-point
//! epoch-uniquification protocol (spec.md §4.7).
//!
//! The `rangemap` dependency is carried over from `samply`/`samply-symbols`
//! (used there for native code-range → module lookups); here it plays the
//! same role for CoreCLR JIT'd method ranges.

use std::collections::HashMap;

use rangemap::RangeMap;

#[derive(Debug, Clone)]
pub struct MethodDescription {
    pub name: String,
    pub namespace: String,
    pub signature: Option<String>,
    pub start_address: Option<u64>,
    pub size: Option<u32>,
}

impl MethodDescription {
    fn synthetic(address: u64) -> Self {
        MethodDescription {
            name: format!("0x{address:x}"),
            namespace: String::new(),
            signature: None,
            start_address: None,
            size: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StackFrame {
    pub address: u64,
    pub method: MethodDescription,
}

/// Tracks raw stack-id → address lists plus the rundown-derived address
/// range table, and performs the final per-event resolution pass.
pub struct StackResolver {
    stacks: HashMap<u64, Vec<u64>>,
    methods: RangeMap<u64, MethodDescription>,
    /// Added to every raw id seen since the last sequence point
    /// (spec.md §4.7).
    stack_index_offset: u64,
    /// Count of indices used since the current epoch started, i.e. one past
    /// the highest index handed out so far.
    indices_used: u64,
}

impl StackResolver {
    pub fn new() -> Self {
        StackResolver {
            stacks: HashMap::new(),
            methods: RangeMap::new(),
            stack_index_offset: 0,
            indices_used: 0,
        }
    }

    /// Global index for a raw, per-epoch stack/stack-block id.
    pub fn effective_index(&self, raw_id: u32) -> u64 {
        self.stack_index_offset + raw_id as u64
    }

    pub fn register_stack(&mut self, raw_id: u32, addresses: Vec<u64>) {
        let index = self.effective_index(raw_id);
        self.stacks.insert(index, addresses);
        self.indices_used = self.indices_used.max(index + 1);
    }

    /// Side effect of an `SPBlock`: shift the epoch forward so the next
    /// block's ids (which restart at zero) don't collide with this one's.
    pub fn on_sequence_point(&mut self) {
        self.stack_index_offset = self.indices_used;
    }

    pub fn register_method(&mut self, start: u64, size: u32, method: MethodDescription) {
        if size == 0 {
            return;
        }
        self.methods.insert(start..start + size as u64, method);
    }

    /// Resolves a global stack index into a concrete ordered list of
    /// symbolized frames, innermost first (the address list's own order).
    /// Called only after the whole stream has been parsed, so every
    /// rundown `MethodDCEnd` has already populated `self.methods`.
    pub fn resolve(&self, stack_index: u64) -> Vec<StackFrame> {
        let Some(addresses) = self.stacks.get(&stack_index) else {
            return Vec::new();
        };
        addresses
            .iter()
            .map(|&addr| {
                let method = self
                    .methods
                    .get(&addr)
                    .cloned()
                    .unwrap_or_else(|| MethodDescription::synthetic(addr));
                StackFrame {
                    address: addr,
                    method,
                }
            })
            .collect()
    }
}

impl Default for StackResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S5 from spec.md §8: two StackBlocks, both `firstId = 0`, separated
    /// by an SPBlock, must resolve to distinct stack indices.
    #[test]
    fn sequence_point_uniquifies_colliding_raw_ids() {
        let mut resolver = StackResolver::new();
        resolver.register_stack(0, vec![0xAAAA]);
        let first_index = resolver.effective_index(0);

        resolver.on_sequence_point();
        resolver.register_stack(0, vec![0xBBBB]);
        let second_index = resolver.effective_index(0);

        assert_ne!(first_index, second_index);
        assert_eq!(resolver.resolve(first_index)[0].address, 0xAAAA);
        assert_eq!(resolver.resolve(second_index)[0].address, 0xBBBB);
    }

    /// S6 from spec.md §8: rundown method registration then address lookup.
    #[test]
    fn resolves_address_within_rundown_method_range() {
        let mut resolver = StackResolver::new();
        resolver.register_method(
            0x1000,
            0x100,
            MethodDescription {
                name: "M".into(),
                namespace: "N".into(),
                signature: Some("()".into()),
                start_address: Some(0x1000),
                size: Some(0x100),
            },
        );
        resolver.register_stack(0, vec![0x1050]);
        let frames = resolver.resolve(resolver.effective_index(0));
        assert_eq!(frames[0].method.name, "M");
        assert_eq!(frames[0].method.namespace, "N");
    }

    #[test]
    fn unknown_address_gets_synthetic_description() {
        let mut resolver = StackResolver::new();
        resolver.register_stack(0, vec![0xDEAD]);
        let frames = resolver.resolve(resolver.effective_index(0));
        assert_eq!(frames[0].method.name, "0xdead");
    }
}
