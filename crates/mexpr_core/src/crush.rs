//! Same-symbol merging of comparison leaves.
//!
//! Inside an `AND`, comparisons on one symbol intersect: masks union when
//! the values agree, contradictions collapse to `false`, and string
//! disequalities conjoin. Inside an `OR` they union: identical equalities
//! collapse and two distinct string disequalities cover everything. A
//! merged group that still has several alternatives stays an `OR` of
//! equalities on the one symbol, a value set that the matcher later
//! turns into a conjunction clause.

use std::collections::BTreeSet;
use std::rc::Rc;

use fxhash::FxHashMap;

use crate::expr::{Cmp, Expr, Operand, Relop};
use crate::symtab::Symbol;

pub(crate) enum CrushOutcome {
    /// A group collapsed to the Boolean that absorbs the whole node.
    Boolean(bool),
    Children(Vec<Expr>),
}

enum GroupResult {
    Boolean(bool),
    Parts(Vec<Expr>),
}

/// Merges the members of `children` that compare the same symbol.
/// `is_and` selects intersection semantics, otherwise union.
pub(crate) fn same_symbol(is_and: bool, children: Vec<Expr>) -> CrushOutcome {
    let names: Vec<Option<String>> = children
        .iter()
        .map(|c| c.comparison_symbol().map(|s| s.name().to_string()))
        .collect();
    let grouped: Vec<bool> = {
        let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
        for name in names.iter().flatten() {
            *counts.entry(name.as_str()).or_insert(0) += 1;
        }
        if counts.values().all(|&n| n < 2) {
            return CrushOutcome::Children(children);
        }
        names
            .iter()
            .map(|n| n.as_deref().is_some_and(|n| counts[n] >= 2))
            .collect()
    };

    enum Slot {
        Expr(Expr),
        Group(String),
    }
    let mut groups: FxHashMap<String, Vec<Expr>> = FxHashMap::default();
    let mut slots: Vec<Slot> = Vec::new();
    for ((child, name), grouped) in children.into_iter().zip(names).zip(grouped) {
        if grouped {
            let name = name.unwrap_or_default();
            let members = groups.entry(name.clone()).or_default();
            if members.is_empty() {
                slots.push(Slot::Group(name));
            }
            members.push(child);
        } else {
            slots.push(Slot::Expr(child));
        }
    }

    let mut out = Vec::new();
    for slot in slots {
        match slot {
            Slot::Expr(e) => out.push(e),
            Slot::Group(name) => {
                let members = groups.remove(&name).unwrap_or_default();
                match crush_group(is_and, members) {
                    GroupResult::Boolean(b) if b != is_and => return CrushOutcome::Boolean(b),
                    GroupResult::Boolean(_) => {}
                    GroupResult::Parts(parts) => {
                        for part in parts {
                            match part {
                                // a merged set stays a leaf under AND but
                                // splices into an enclosing OR
                                Expr::Or(subs) if !is_and => out.extend(subs),
                                e => out.push(e),
                            }
                        }
                    }
                }
            }
        }
    }
    CrushOutcome::Children(out)
}

fn crush_group(is_and: bool, members: Vec<Expr>) -> GroupResult {
    let Some(symbol) = members.first().and_then(|m| m.comparison_symbol()).map(Rc::clone)
    else {
        return GroupResult::Parts(members);
    };
    let crushed = if symbol.is_string() {
        if is_and {
            crush_and_string(&symbol, &members)
        } else {
            crush_or_string(&symbol, &members)
        }
    } else if is_and {
        crush_and_numeric(&symbol, &members)
    } else {
        crush_or_numeric(&symbol, &members)
    };
    // members the rules above do not cover pass through unmerged
    crushed.unwrap_or(GroupResult::Parts(members))
}

/// The equality alternatives denoted by one group member: a single
/// equality, or a set of them. `None` for any other shape.
fn num_alternatives(member: &Expr) -> Option<Vec<(u128, u128)>> {
    fn eq_of(e: &Expr) -> Option<(u128, u128)> {
        match e {
            Expr::Cmp(Cmp {
                relop: Relop::Eq,
                operand: Operand::Integer { value, mask },
                ..
            }) => Some((*value, *mask)),
            _ => None,
        }
    }
    match member {
        Expr::Cmp(_) => Some(vec![eq_of(member)?]),
        Expr::Or(subs) => subs.iter().map(eq_of).collect(),
        _ => None,
    }
}

fn str_alternatives(member: &Expr) -> Option<Vec<String>> {
    fn eq_of(e: &Expr) -> Option<String> {
        match e {
            Expr::Cmp(Cmp { relop: Relop::Eq, operand: Operand::String(s), .. }) => {
                Some(s.clone())
            }
            _ => None,
        }
    }
    match member {
        Expr::Cmp(_) => Some(vec![eq_of(member)?]),
        Expr::Or(subs) => subs.iter().map(eq_of).collect(),
        _ => None,
    }
}

fn eq_parts(symbol: &Rc<Symbol>, alts: Vec<(u128, u128)>) -> GroupResult {
    let cmps: Vec<Expr> = alts
        .into_iter()
        .map(|(value, mask)| {
            Expr::Cmp(Cmp {
                symbol: Rc::clone(symbol),
                relop: Relop::Eq,
                operand: Operand::Integer { value, mask },
            })
        })
        .collect();
    if cmps.len() == 1 {
        GroupResult::Parts(cmps)
    } else {
        GroupResult::Parts(vec![Expr::Or(cmps)])
    }
}

fn str_eq_parts(symbol: &Rc<Symbol>, alts: Vec<String>) -> GroupResult {
    let cmps: Vec<Expr> = alts
        .into_iter()
        .map(|value| {
            Expr::Cmp(Cmp {
                symbol: Rc::clone(symbol),
                relop: Relop::Eq,
                operand: Operand::String(value),
            })
        })
        .collect();
    if cmps.len() == 1 {
        GroupResult::Parts(cmps)
    } else {
        GroupResult::Parts(vec![Expr::Or(cmps)])
    }
}

fn crush_and_numeric(symbol: &Rc<Symbol>, members: &[Expr]) -> Option<GroupResult> {
    let mut alts: Vec<(u128, u128)> = vec![(0, 0)];
    for member in members {
        let member_alts = num_alternatives(member)?;
        let mut next: Vec<(u128, u128)> = Vec::new();
        for &(av, am) in &alts {
            for &(bv, bm) in &member_alts {
                if (av ^ bv) & (am & bm) != 0 {
                    continue; // contradictory on the shared mask bits
                }
                let merged = (av | bv, am | bm);
                if !next.contains(&merged) {
                    next.push(merged);
                }
            }
        }
        if next.is_empty() {
            return Some(GroupResult::Boolean(false));
        }
        alts = next;
    }
    alts.sort_unstable();
    alts.dedup();
    Some(eq_parts(symbol, alts))
}

fn crush_or_numeric(symbol: &Rc<Symbol>, members: &[Expr]) -> Option<GroupResult> {
    let mut alts = Vec::new();
    for member in members {
        alts.extend(num_alternatives(member)?);
    }
    alts.sort_unstable();
    alts.dedup();
    Some(eq_parts(symbol, alts))
}

fn crush_and_string(symbol: &Rc<Symbol>, members: &[Expr]) -> Option<GroupResult> {
    let mut candidates: Option<Vec<String>> = None;
    let mut excluded: BTreeSet<String> = BTreeSet::new();
    for member in members {
        if let Expr::Cmp(Cmp { relop: Relop::Ne, operand: Operand::String(s), .. }) = member {
            excluded.insert(s.clone());
            continue;
        }
        let alts = str_alternatives(member)?;
        candidates = Some(match candidates {
            None => alts,
            Some(prev) => prev.into_iter().filter(|p| alts.contains(p)).collect(),
        });
    }
    match candidates {
        Some(cands) => {
            let mut cands: Vec<String> =
                cands.into_iter().filter(|c| !excluded.contains(c)).collect();
            cands.sort_unstable();
            cands.dedup();
            if cands.is_empty() {
                Some(GroupResult::Boolean(false))
            } else {
                Some(str_eq_parts(symbol, cands))
            }
        }
        None => Some(GroupResult::Parts(
            excluded
                .into_iter()
                .map(|value| {
                    Expr::Cmp(Cmp {
                        symbol: Rc::clone(symbol),
                        relop: Relop::Ne,
                        operand: Operand::String(value),
                    })
                })
                .collect(),
        )),
    }
}

fn crush_or_string(symbol: &Rc<Symbol>, members: &[Expr]) -> Option<GroupResult> {
    let mut eqs: Vec<String> = Vec::new();
    let mut nes: BTreeSet<String> = BTreeSet::new();
    for member in members {
        if let Expr::Cmp(Cmp { relop: Relop::Ne, operand: Operand::String(s), .. }) = member {
            nes.insert(s.clone());
            continue;
        }
        eqs.extend(str_alternatives(member)?);
    }
    if nes.len() >= 2 {
        // s != a || s != b holds for every s when a differs from b
        return Some(GroupResult::Boolean(true));
    }
    if let Some(ne) = nes.into_iter().next() {
        if eqs.contains(&ne) {
            return Some(GroupResult::Boolean(true));
        }
        return Some(GroupResult::Parts(vec![Expr::Cmp(Cmp {
            symbol: Rc::clone(symbol),
            relop: Relop::Ne,
            operand: Operand::String(ne),
        })]));
    }
    eqs.sort_unstable();
    eqs.dedup();
    Some(str_eq_parts(symbol, eqs))
}
