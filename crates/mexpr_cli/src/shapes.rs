//! Expression-shape enumeration for the exhaustive harness.
//!
//! The compositions of N (all ordered ways to sum positive integers to
//! N, iterated with the algorithm of Knuth, TAOCP 7.2.1.1 answer 12(a))
//! give the ways to split N leaves among the children of one node; tree
//! shapes apply them recursively to every child of three or more leaves;
//! terminals cascade through relational operators, variables, values and
//! masks, skipping the combinations no installable comparison can carry.

use std::rc::Rc;

use mexpr_core::expr::{Cmp, Expr, Operand, Relop};
use mexpr_core::symtab::Symbol;

/// Upper bound on leaves per tree, same bound for composition elements.
pub const MAX_LEAVES: usize = 50;

/// Begins iterating the compositions of `n`: initializes `s` and returns
/// the element count of the first composition, which is always `n` itself.
pub fn first_composition(n: i32, state: &mut u32, s: &mut [i32]) -> usize {
    *state = 0;
    s[0] = n;
    1
}

/// Advances `s` (with `sn` elements) to the next composition and returns
/// its element count, or 0 when the iteration is complete.
pub fn next_composition(state: &mut u32, s: &mut [i32], sn: usize) -> usize {
    let mut j = sn - 1;
    *state += 1;
    if *state & 1 == 1 {
        if s[j] > 1 {
            s[j] -= 1;
            s[j + 1] = 1;
            j += 1;
        } else {
            if j == 0 {
                return 0;
            }
            j -= 1;
            s[j] += 1;
        }
    } else {
        if j == 0 {
            return 0;
        }
        if s[j - 1] > 1 {
            s[j - 1] -= 1;
            s[j + 1] = s[j];
            s[j] = 1;
            j += 1;
        } else {
            j -= 1;
            s[j] = s[j + 1];
            if j == 0 {
                return 0;
            }
            s[j - 1] += 1;
        }
    }
    j + 1
}

/// Iterator over the compositions of `n`, in the order the state machine
/// produces them.
pub struct Compositions {
    state: u32,
    s: Vec<i32>,
    sn: usize,
    started: bool,
}

impl Compositions {
    pub fn new(n: i32) -> Self {
        assert!(n >= 1 && n <= MAX_LEAVES as i32);
        let mut s = vec![0; MAX_LEAVES + 1];
        let mut state = 0;
        let sn = first_composition(n, &mut state, &mut s);
        Compositions { state, s, sn, started: false }
    }
}

impl Iterator for Compositions {
    type Item = Vec<i32>;

    fn next(&mut self) -> Option<Vec<i32>> {
        if !self.started {
            self.started = true;
            return Some(self.s[..self.sn].to_vec());
        }
        self.sn = next_composition(&mut self.state, &mut self.s, self.sn);
        if self.sn == 0 {
            None
        } else {
            Some(self.s[..self.sn].to_vec())
        }
    }
}

/// One node of a tree shape: `sn` children, child `i` a leaf when
/// `s[i] == 1`, otherwise a subtree with `s[i]` leaves. Subtrees of three
/// or more leaves are described by the following [TreeShape]s in-order.
#[derive(Clone, Debug)]
pub struct TreeShape {
    state: u32,
    s: Vec<i32>,
    sn: usize,
}

impl TreeShape {
    fn new() -> Self {
        TreeShape { state: 0, s: vec![0; MAX_LEAVES + 1], sn: 0 }
    }
}

/// The first set of shapes for trees with `n` leaves.
pub fn init_shapes(n: i32) -> Vec<TreeShape> {
    match n {
        1 => {
            let mut shape = TreeShape::new();
            shape.sn = 1;
            shape.s[0] = 1;
            vec![shape]
        }
        2 => {
            let mut shape = TreeShape::new();
            shape.sn = 2;
            shape.s[0] = 1;
            shape.s[1] = 1;
            vec![shape]
        }
        _ => subshapes(n),
    }
}

fn subshapes(n: i32) -> Vec<TreeShape> {
    if n <= 2 {
        return Vec::new();
    }
    let mut shape = TreeShape::new();
    // skip the first composition: `n` alone is not a split
    shape.sn = first_composition(n, &mut shape.state, &mut shape.s);
    shape.sn = next_composition(&mut shape.state, &mut shape.s, shape.sn);
    let arms: Vec<i32> = shape.s[..shape.sn].to_vec();
    let mut out = vec![shape];
    for arm in arms {
        out.extend(subshapes(arm));
    }
    out
}

/// Advances to the next tree shape, false when all shapes are done.
pub fn next_shapes(shapes: &mut Vec<TreeShape>) -> bool {
    if shapes.len() == 1 {
        let s = &shapes[0];
        if s.sn == 2 && s.s[0] == 1 && s.s[1] == 1 {
            return false;
        }
    }
    while let Some(last) = shapes.last_mut() {
        last.sn = if last.sn > 1 {
            next_composition(&mut last.state, &mut last.s, last.sn)
        } else {
            0
        };
        if last.sn != 0 {
            let arms: Vec<i32> = last.s[..last.sn].to_vec();
            for arm in arms {
                let sub = subshapes(arm);
                shapes.extend(sub);
            }
            return true;
        }
        shapes.pop();
    }
    false
}

pub fn print_shapes(shapes: &[TreeShape]) -> String {
    let mut out = String::new();
    for (i, shape) in shapes.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        for &arm in &shape.s[..shape.sn] {
            if arm > 9 {
                out.push_str(&format!("({arm})"));
            } else {
                out.push_str(&arm.to_string());
            }
        }
    }
    out
}

/// Builds the expression of a tree shape, alternating `AND` and `OR`
/// levels starting from `base_is_and`, plugging `terminals` in from left
/// to right.
pub fn build_tree(shapes: &[TreeShape], base_is_and: bool, terminals: &[Expr]) -> Expr {
    let mut shape_index = 0;
    let mut terminal_index = 0;
    let expr = build(shapes, &mut shape_index, terminals, &mut terminal_index, base_is_and);
    debug_assert_eq!(terminal_index, terminals.len());
    expr
}

fn build(
    shapes: &[TreeShape],
    shape_index: &mut usize,
    terminals: &[Expr],
    terminal_index: &mut usize,
    is_and: bool,
) -> Expr {
    fn take(terminals: &[Expr], terminal_index: &mut usize) -> Expr {
        let expr = terminals[*terminal_index].clone();
        *terminal_index += 1;
        expr
    }
    fn join(is_and: bool, mut children: Vec<Expr>) -> Expr {
        match children.len() {
            1 => children.remove(0),
            _ if is_and => Expr::And(children),
            _ => Expr::Or(children),
        }
    }

    let shape = &shapes[*shape_index];
    *shape_index += 1;
    let arms: Vec<i32> = shape.s[..shape.sn].to_vec();
    let mut children = Vec::with_capacity(arms.len());
    for arm in arms {
        let child = match arm {
            1 => take(terminals, terminal_index),
            2 => {
                let pair = vec![take(terminals, terminal_index), take(terminals, terminal_index)];
                join(!is_and, pair)
            }
            _ => build(shapes, shape_index, terminals, terminal_index, !is_and),
        };
        children.push(child);
    }
    join(is_and, children)
}

/// The relational operators the exhaustive test cascades through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelopSet(u8);

const RELOP_ORDER: [Relop; 6] =
    [Relop::Eq, Relop::Ne, Relop::Lt, Relop::Le, Relop::Gt, Relop::Ge];

fn relop_index(relop: Relop) -> u8 {
    RELOP_ORDER.iter().position(|&r| r == relop).unwrap_or(0) as u8
}

impl RelopSet {
    pub const ALL: RelopSet = RelopSet(0x3f);

    pub fn empty() -> RelopSet {
        RelopSet(0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, relop: Relop) {
        self.0 |= 1 << relop_index(relop);
    }

    pub fn contains(self, relop: Relop) -> bool {
        self.0 & (1 << relop_index(relop)) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Relop> {
        RELOP_ORDER.into_iter().filter(move |&r| self.contains(r))
    }

    /// The lowest operator of the set.
    pub fn first(self) -> Relop {
        self.iter().next().unwrap_or(Relop::Eq)
    }

    /// The next operator of the set above `relop`, wrapping to the lowest.
    pub fn next_cyclic(self, relop: Relop) -> Relop {
        let above = self.0 & !((1u8 << (relop_index(relop) + 1)) - 1);
        if above != 0 {
            RELOP_ORDER[above.trailing_zeros() as usize]
        } else {
            self.first()
        }
    }
}

impl std::fmt::Display for RelopSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, relop) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{relop}")?;
        }
        Ok(())
    }
}

/// Context the terminal cascade runs in.
pub struct TerminalCtx<'a> {
    pub nvars: &'a [Rc<Symbol>],
    pub svars: &'a [Rc<Symbol>],
    pub n_bits: u32,
    pub relops: RelopSet,
}

/// One leaf of the expression under test.
#[derive(Clone, Debug)]
pub enum Terminal {
    Num { var: usize, relop: Relop, value: u128, mask: u128 },
    Str { var: usize, value: u8 },
    Bool(bool),
}

/// `x` with the rightmost contiguous run of 1s cleared, e.g. 01011100
/// becomes 01000000 (Warren, Hacker's Delight section 2-1).
fn turn_off_rightmost_ones(x: u128) -> u128 {
    ((x & x.wrapping_neg()).wrapping_add(x)) & x
}

impl Terminal {
    pub fn first(ctx: &TerminalCtx) -> Terminal {
        if !ctx.nvars.is_empty() {
            Terminal::Num { var: 0, relop: ctx.relops.first(), value: 0, mask: 1 }
        } else if !ctx.svars.is_empty() {
            Terminal::Str { var: 0, value: 0 }
        } else {
            Terminal::Bool(false)
        }
    }

    /// Advances to the next terminal, false when the cascade wraps.
    pub fn next(&mut self, ctx: &TerminalCtx) -> bool {
        match self {
            Terminal::Bool(b) => {
                if *b {
                    false
                } else {
                    *b = true;
                    true
                }
            }
            Terminal::Str { var, value } => {
                if *value == 0 {
                    *value = 1;
                    return true;
                }
                *var += 1;
                if *var < ctx.svars.len() {
                    *value = 0;
                    return true;
                }
                *self = Terminal::Bool(false);
                true
            }
            Terminal::Num { var, relop, value, mask } => {
                let var_mask = (1u128 << ctx.n_bits) - 1;
                let mut next = *value + (*mask << ctx.n_bits);
                loop {
                    next += 1;
                    if next >= 1u128 << (2 * ctx.n_bits) {
                        let old = *relop;
                        *relop = ctx.relops.next_cyclic(old);
                        if relop_index(*relop) <= relop_index(old) {
                            *var += 1;
                            if *var >= ctx.nvars.len() {
                                *self = if ctx.svars.is_empty() {
                                    Terminal::Bool(false)
                                } else {
                                    Terminal::Str { var: 0, value: 0 }
                                };
                                return true;
                            }
                        }
                        next = 0;
                        continue;
                    }
                    let m = next >> ctx.n_bits;
                    let v = next & var_mask;
                    if m == 0 {
                        // empty mask is pathological
                    } else if v & !m != 0 {
                        // 1-bits in the value outside the mask
                    } else if turn_off_rightmost_ones(m) != 0 && relop.is_ordering() {
                        // ordering operators need a single run of 1-bits
                    } else {
                        *value = v;
                        *mask = m;
                        return true;
                    }
                }
            }
        }
    }

    pub fn to_expr(&self, ctx: &TerminalCtx) -> Expr {
        match self {
            Terminal::Bool(b) => Expr::Boolean(*b),
            Terminal::Str { var, value } => Expr::Cmp(Cmp {
                symbol: Rc::clone(&ctx.svars[*var]),
                relop: Relop::Eq,
                operand: Operand::String(value.to_string()),
            }),
            Terminal::Num { var, relop, value, mask } => Expr::Cmp(Cmp {
                symbol: Rc::clone(&ctx.nvars[*var]),
                relop: *relop,
                operand: Operand::Integer { value: *value, mask: *mask },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(3, 4)]
    #[case(5, 16)]
    #[case(7, 64)]
    fn composition_counts(#[case] n: i32, #[case] expected: usize) {
        assert_eq!(Compositions::new(n).count(), expected);
        for composition in Compositions::new(n) {
            assert_eq!(composition.iter().sum::<i32>(), n);
            assert!(composition.iter().all(|&k| k >= 1));
        }
    }

    #[test]
    fn composition_order_matches_the_state_machine() {
        let all: Vec<Vec<i32>> = Compositions::new(3).collect();
        assert_eq!(all, vec![vec![3], vec![2, 1], vec![1, 1, 1], vec![1, 2]]);
    }

    #[rstest]
    #[case(1, 1)]
    #[case(2, 1)]
    #[case(3, 3)]
    #[case(4, 11)]
    fn tree_shape_counts(#[case] n: i32, #[case] expected: usize) {
        let mut shapes = init_shapes(n);
        let mut count = 1;
        while next_shapes(&mut shapes) {
            count += 1;
        }
        assert_eq!(count, expected);
    }

    #[test]
    fn built_trees_honor_invariants() {
        use mexpr_core::fields::FieldId;
        use mexpr_core::symtab::SymTable;

        let mut symtab = SymTable::new();
        let n0 = symtab.add_field("n0", FieldId::Reg(0), None, false);
        let ctx = TerminalCtx { nvars: &[n0], svars: &[], n_bits: 1, relops: RelopSet::ALL };
        let terminal = Terminal::first(&ctx).to_expr(&ctx);
        for n in 1..=4 {
            let terminals = vec![terminal.clone(); n as usize];
            let mut shapes = init_shapes(n);
            loop {
                for base_is_and in [true, false] {
                    let expr = build_tree(&shapes, base_is_and, &terminals);
                    assert!(expr.honors_invariants(), "n={n} shape={}", print_shapes(&shapes));
                }
                if !next_shapes(&mut shapes) {
                    break;
                }
            }
        }
    }

    #[test]
    fn terminal_cascade_covers_operators_and_masks() {
        use mexpr_core::fields::FieldId;
        use mexpr_core::symtab::SymTable;

        let mut symtab = SymTable::new();
        let n0 = symtab.add_field("n0", FieldId::Reg(0), None, false);
        let mut relops = RelopSet::empty();
        relops.insert(Relop::Eq);
        relops.insert(Relop::Lt);
        let ctx = TerminalCtx { nvars: &[n0], svars: &[], n_bits: 2, relops };

        let mut terminal = Terminal::first(&ctx);
        let mut seen = vec![terminal.clone()];
        while terminal.next(&ctx) {
            seen.push(terminal.clone());
        }
        // ends in the boolean phase
        assert!(matches!(seen.last(), Some(Terminal::Bool(true))));
        // every numeric terminal satisfies the cascade filters
        for t in &seen {
            if let Terminal::Num { relop, value, mask, .. } = t {
                assert!(*mask != 0);
                assert!(value & !mask == 0);
                assert!(!(relop.is_ordering() && turn_off_rightmost_ones(*mask) != 0));
            }
        }
        // both operators appear
        assert!(seen.iter().any(|t| matches!(t, Terminal::Num { relop: Relop::Eq, .. })));
        assert!(seen.iter().any(|t| matches!(t, Terminal::Num { relop: Relop::Lt, .. })));
    }
}
