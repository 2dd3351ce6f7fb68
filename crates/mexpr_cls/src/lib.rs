//! # Flow classifier
//!
//! The lookup structure compiled matches are installed into. Each rule is
//! a [FlowMatch] with a priority and an optional list of conjunction
//! clauses. A plain rule matches a packet when every field constraint
//! holds. A conjunctional rule never matches by itself: it contributes
//! its clause to its conjunction group, and the group is satisfied only
//! when at least one alternative of every clause matched. Lookup returns
//! the highest-priority hit.
//!
//! ## Example
//! ```no_run
//! use mexpr_cls::{Classifier, Packet};
//! use mexpr_core::prelude::*;
//!
//! let mut cls = Classifier::new();
//! // matches and n come out of Expr::to_matches
//! # let matches: Vec<(FlowMatch, Vec<Conjunction>)> = vec![];
//! for (flow, conjunctions) in matches {
//!     cls.insert(flow, 0, conjunctions);
//! }
//! let hit = cls.lookup(&Packet::new());
//! ```

use bitvec::prelude::*;
use fxhash::FxHashMap;

use mexpr_core::fields::FieldId;
use mexpr_core::matches::{Conjunction, FlowMatch};

/// A concrete packet: every field has a value, unset fields read as zero.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    fields: FxHashMap<FieldId, u128>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: FieldId, value: u128) -> &mut Self {
        self.fields.insert(field, value);
        self
    }

    pub fn get(&self, field: FieldId) -> u128 {
        self.fields.get(&field).copied().unwrap_or(0)
    }
}

/// One installed rule.
#[derive(Debug)]
pub struct Rule {
    pub priority: i32,
    pub flow: FlowMatch,
    pub conjunctions: Vec<Conjunction>,
}

impl Rule {
    fn matches(&self, packet: &Packet) -> bool {
        self.flow.fields().all(|(field, value, mask)| packet.get(field) & mask == value)
    }
}

/// Linear-scan classifier. The compiler treats it as a black box; the
/// scan is over installed rules in priority order, with conjunction
/// groups resolved per lookup.
#[derive(Debug, Default)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn insert(&mut self, flow: FlowMatch, priority: i32, conjunctions: Vec<Conjunction>) {
        self.rules.push(Rule { priority, flow, conjunctions });
    }

    /// The highest-priority rule matching `packet`, with conjunction
    /// groups counted as hits only when every clause is satisfied.
    pub fn lookup(&self, packet: &Packet) -> Option<&Rule> {
        let mut best: Option<&Rule> = None;
        let mut groups: FxHashMap<(i32, u32), (BitVec, &Rule)> = FxHashMap::default();
        for rule in &self.rules {
            if !rule.matches(packet) {
                continue;
            }
            if rule.conjunctions.is_empty() {
                if best.is_none_or(|b| rule.priority > b.priority) {
                    best = Some(rule);
                }
            } else {
                for c in &rule.conjunctions {
                    let (clauses, _) = groups
                        .entry((rule.priority, c.id))
                        .or_insert_with(|| (bitvec![0; c.n_clauses as usize], rule));
                    clauses.set(c.clause as usize, true);
                }
            }
        }
        for ((priority, _), (clauses, rule)) in &groups {
            if clauses.all() && best.is_none_or(|b| *priority > b.priority) {
                best = Some(*rule);
            }
        }
        best
    }
}

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{Classifier, Packet, Rule};
}
