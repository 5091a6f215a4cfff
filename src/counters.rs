//! A small counter bag used to throttle log noise and count consecutive
//! probe failures.
//!
//! Two maps: a name -> count table, and a name -> predicate table. The
//! predicate closures receive a reference to the count table so `should` can
//! stay pure with respect to the counts at the instant of the call.

use std::collections::HashMap;

type Condition = Box<dyn Fn(&HashMap<String, u64>) -> bool + Send + Sync>;

pub struct DecisionCounters {
    counts: HashMap<String, u64>,
    conditions: HashMap<String, Condition>,
}

impl Default for DecisionCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionCounters {
    pub fn new() -> Self {
        DecisionCounters {
            counts: HashMap::new(),
            conditions: HashMap::new(),
        }
    }

    /// Register a named predicate over the current counts.
    pub fn add_condition<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&HashMap<String, u64>) -> bool + Send + Sync + 'static,
    {
        self.conditions.insert(name.into(), Box::new(predicate));
    }

    /// Increment a named counter, creating it at 0 first if unseen.
    pub fn increment(&mut self, name: &str) {
        *self.counts.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Reset a named counter to 0.
    pub fn reset(&mut self, name: &str) {
        self.counts.insert(name.to_string(), 0);
    }

    /// Current value of a named counter (0 if never incremented).
    pub fn get(&self, name: &str) -> u64 {
        *self.counts.get(name).unwrap_or(&0)
    }

    /// Evaluate a registered predicate against the current counts. Panics if
    /// `name` was never registered via `add_condition` -- that is a
    /// programmer error, not a runtime condition.
    pub fn should(&self, name: &str) -> bool {
        let predicate = self
            .conditions
            .get(name)
            .unwrap_or_else(|| panic!("no condition registered under {name:?}"));
        predicate(&self.counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_get() {
        let mut counters = DecisionCounters::new();
        counters.increment("dial");
        counters.increment("dial");
        assert_eq!(counters.get("dial"), 2);
        assert_eq!(counters.get("never_touched"), 0);
    }

    #[test]
    fn reset_zeroes_the_counter() {
        let mut counters = DecisionCounters::new();
        counters.increment("consecutiveUnhealthyChecks");
        counters.increment("consecutiveUnhealthyChecks");
        counters.reset("consecutiveUnhealthyChecks");
        assert_eq!(counters.get("consecutiveUnhealthyChecks"), 0);
    }

    #[test]
    fn log_every_fifth_dial() {
        let mut counters = DecisionCounters::new();
        counters.add_condition("log", |counts| {
            counts.get("dial").copied().unwrap_or(0) % 5 == 0
        });

        let mut fired = Vec::new();
        for _ in 1..=10 {
            counters.increment("dial");
            fired.push(counters.should("log"));
        }

        assert_eq!(
            fired,
            vec![
                false, false, false, false, true, false, false, false, false, true
            ]
        );
    }
}
