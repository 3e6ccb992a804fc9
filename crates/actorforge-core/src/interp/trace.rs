//! What a run of a generated program did.

use indexmap::IndexMap;
use serde::Serialize;

/// Array traffic per field, and calls per method.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    pub loads: IndexMap<String, usize>,
    pub stores: IndexMap<String, usize>,
    pub calls: IndexMap<String, usize>,
    pub steps: u64,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_load(&mut self, field: &str) {
        *self.loads.entry(field.to_string()).or_default() += 1;
    }

    pub fn record_store(&mut self, field: &str) {
        *self.stores.entry(field.to_string()).or_default() += 1;
    }

    pub fn record_call(&mut self, class: &str, method: &str) {
        *self.calls.entry(format!("{}.{}", class, method)).or_default() += 1;
    }

    pub fn loads_of(&self, field: &str) -> usize {
        self.loads.get(field).copied().unwrap_or(0)
    }

    pub fn stores_of(&self, field: &str) -> usize {
        self.stores.get(field).copied().unwrap_or(0)
    }

    /// Loads summed over every field whose name starts with `prefix`.
    pub fn loads_matching(&self, prefix: &str) -> usize {
        sum_matching(&self.loads, prefix)
    }

    pub fn stores_matching(&self, prefix: &str) -> usize {
        sum_matching(&self.stores, prefix)
    }

    pub fn calls_of(&self, class: &str, method: &str) -> usize {
        self.calls
            .get(&format!("{}.{}", class, method))
            .copied()
            .unwrap_or(0)
    }
}

fn sum_matching(counts: &IndexMap<String, usize>, prefix: &str) -> usize {
    counts
        .iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .map(|(_, n)| n)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_prefix() {
        let mut trace = ExecutionTrace::new();
        trace.record_store("_CGbuffer_top_r_0_int");
        trace.record_store("_CGbuffer_top_r_0_int");
        trace.record_store("_CGbuffer_top_s_0_double");
        trace.record_load("_CGindex_top_a_output");
        assert_eq!(trace.stores_matching("_CGbuffer_"), 3);
        assert_eq!(trace.stores_of("_CGbuffer_top_r_0_int"), 2);
        assert_eq!(trace.loads_matching("_CGbuffer_"), 0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut trace = ExecutionTrace::new();
        trace.record_call("generated.top", "fire");
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["calls"]["generated.top.fire"], 1);
        assert_eq!(json["steps"], 0);
    }
}
