//! The exhaustive property harness: every tree shape with N leaves,
//! every terminal cascade, every variable assignment; each expression is
//! pushed through the configured pipeline depth and the result compared
//! against direct evaluation, and for the flow operation against a
//! classifier lookup.
//!
//! With `--parallel` above one the harness re-executes the current binary
//! once per tree shape (selected by a hidden `--shape-index`), keeps the
//! requested number of children running, and reaps them in spawn order;
//! workers report only through their exit code.

use std::collections::VecDeque;
use std::process::{Child, Command};

use tracing::debug;

use mexpr_cls::{Classifier, Packet};
use mexpr_core::expr::Expr;
use mexpr_core::fields::FieldId;
use mexpr_core::matches::StringMap;
use mexpr_core::symtab::SymTable;

use crate::eval::{evaluate, Assignment};
use crate::shapes::{
    build_tree, init_shapes, next_shapes, print_shapes, RelopSet, Terminal, TerminalCtx,
    TreeShape,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Convert,
    Simplify,
    Normalize,
    Flow,
}

impl Operation {
    pub fn parse(s: &str) -> Option<Operation> {
        match s {
            "convert" => Some(Operation::Convert),
            "simplify" => Some(Operation::Simplify),
            "normalize" => Some(Operation::Normalize),
            "flow" => Some(Operation::Flow),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Convert => "convert",
            Operation::Simplify => "simplify",
            Operation::Normalize => "normalize",
            Operation::Flow => "flow",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub n_terminals: i32,
    pub nvars: usize,
    pub svars: usize,
    pub n_bits: u32,
    pub relops: RelopSet,
    pub operation: Operation,
    pub parallel: usize,
    pub verbosity: u8,
    /// Set in worker processes: handle only this flat shape index.
    pub shape_index: Option<usize>,
}

pub fn run(cfg: &Config) -> i32 {
    let mut symtab = SymTable::new();
    let mut nvars = Vec::with_capacity(cfg.nvars);
    for i in 0..cfg.nvars {
        nvars.push(symtab.add_field(&format!("n{i}"), FieldId::Reg(i as u8), None, false));
    }
    let mut svars = Vec::with_capacity(cfg.svars);
    for i in 0..cfg.svars {
        svars.push(symtab.add_string(&format!("s{i}"), FieldId::Reg((cfg.nvars + i) as u8), None));
    }
    let mut string_map = StringMap::default();
    string_map.insert("0".to_string(), 0);
    string_map.insert("1".to_string(), 1);
    let ctx =
        TerminalCtx { nvars: &nvars, svars: &svars, n_bits: cfg.n_bits, relops: cfg.relops };

    let parallel = cfg.shape_index.is_none() && cfg.parallel > 1;
    let mut workers = WorkerPool::new(cfg);
    let mut n_tested: u64 = 0;
    let mut index = 0;
    for base_is_and in [true, false] {
        let mut shapes = init_shapes(cfg.n_terminals);
        loop {
            let job = index;
            index += 1;
            if cfg.shape_index.map_or(true, |only| only == job) {
                if cfg.verbosity > 0 {
                    println!("{}", print_shapes(&shapes));
                }
                if parallel {
                    if let Err(code) = workers.spawn(job) {
                        return code;
                    }
                } else {
                    match test_shape(&shapes, base_is_and, &symtab, &ctx, &string_map, cfg) {
                        Ok(n) => n_tested += n,
                        Err(code) => return code,
                    }
                }
            }
            if !next_shapes(&mut shapes) {
                break;
            }
        }
    }
    if let Err(code) = workers.finish() {
        return code;
    }
    if cfg.shape_index.is_none() {
        print_summary(cfg, n_tested);
    }
    0
}

fn print_summary(cfg: &Config, n_tested: u64) {
    let what = match cfg.operation {
        Operation::Convert => "converting",
        Operation::Simplify => "simplifying",
        Operation::Normalize => "normalizing",
        Operation::Flow => "converting to flows",
    };
    if n_tested > 0 {
        print!("Tested {what} {n_tested} expressions of {} terminals", cfg.n_terminals);
    } else {
        print!("Tested {what} all {}-terminal expressions", cfg.n_terminals);
    }
    if cfg.nvars > 0 || cfg.svars > 0 {
        print!(" with");
        if cfg.nvars > 0 {
            print!(
                " {} numeric vars (each {} bits) in terms of operators {}",
                cfg.nvars, cfg.n_bits, cfg.relops
            );
        }
        if cfg.nvars > 0 && cfg.svars > 0 {
            print!(" and");
        }
        if cfg.svars > 0 {
            print!(" {} string vars", cfg.svars);
        }
    } else {
        print!(" in terms of Boolean constants only");
    }
    println!(".");
}

fn test_shape(
    shapes: &[TreeShape],
    base_is_and: bool,
    symtab: &SymTable,
    ctx: &TerminalCtx,
    string_map: &StringMap,
    cfg: &Config,
) -> Result<u64, i32> {
    let n_terminals = cfg.n_terminals as usize;
    let mut terminals: Vec<Terminal> = (0..n_terminals).map(|_| Terminal::first(ctx)).collect();
    let mut n_tested = 0;
    loop {
        let leaves: Vec<Expr> = terminals.iter().map(|t| t.to_expr(ctx)).collect();
        let expr = build_tree(shapes, base_is_and, &leaves);
        assert!(expr.honors_invariants());
        n_tested += 1;
        test_one(&expr, symtab, ctx, string_map, cfg)?;

        // odometer over the terminals, least significant last
        let mut i = terminals.len();
        loop {
            if i == 0 {
                debug!(n_tested, shape = %print_shapes(shapes), "shape done");
                return Ok(n_tested);
            }
            i -= 1;
            if terminals[i].next(ctx) {
                break;
            }
            terminals[i] = Terminal::first(ctx);
        }
    }
}

fn test_one(
    expr: &Expr,
    symtab: &SymTable,
    ctx: &TerminalCtx,
    string_map: &StringMap,
    cfg: &Config,
) -> Result<(), i32> {
    let modified = match cfg.operation {
        Operation::Convert => {
            let text = expr.to_string();
            match Expr::parse(&text, symtab) {
                Ok(reparsed) => reparsed,
                Err(err) => {
                    eprintln!("{text} fails to parse ({err})");
                    return Err(1);
                }
            }
        }
        _ => {
            let simplified = expr.clone().simplify();
            if !simplified.honors_invariants() {
                eprintln!("{expr} simplifies to {simplified}, which breaks the invariants");
                return Err(1);
            }
            if matches!(cfg.operation, Operation::Normalize | Operation::Flow) {
                let normalized = simplified.normalize();
                if !normalized.is_normalized() {
                    eprintln!("{expr} fails to normalize ({normalized})");
                    return Err(1);
                }
                normalized
            } else {
                simplified
            }
        }
    };

    let (matches, classifier) = if cfg.operation == Operation::Flow {
        let matches = modified.to_matches(string_map);
        let mut classifier = Classifier::new();
        for (flow, conjunctions) in matches.iter() {
            classifier.insert(flow.clone(), 0, conjunctions.to_vec());
        }
        (Some(matches), Some(classifier))
    } else {
        (None, None)
    };

    let n_subst_bits = ctx.n_bits as usize * ctx.nvars.len() + ctx.svars.len();
    for subst in 0u32..1 << n_subst_bits {
        let env = assignment(subst, ctx);
        let expected = evaluate(expr, &env);
        let actual = evaluate(&modified, &env);
        if actual != expected {
            eprintln!(
                "{expr} evaluates to {}, but {modified} evaluates to {}, for {}",
                expected as i32,
                actual as i32,
                describe(subst, ctx)
            );
            return Err(1);
        }
        if let Some(classifier) = &classifier {
            let found = classifier.lookup(&packet(subst, ctx)).is_some();
            if found != expected {
                eprintln!(
                    "{expr} and {modified} evaluate to {}, for {}.",
                    expected as i32,
                    describe(subst, ctx)
                );
                if let Some(matches) = &matches {
                    eprintln!("Converted to classifier:\n{matches}");
                }
                eprintln!("However, {} flow was found in the classifier.", if found { "a" } else { "no" });
                return Err(1);
            }
        }
    }
    Ok(())
}

fn assignment(subst: u32, ctx: &TerminalCtx) -> Assignment {
    let mut env = Assignment::default();
    let var_mask = (1u32 << ctx.n_bits) - 1;
    for (i, var) in ctx.nvars.iter().enumerate() {
        let value = (subst >> (i * ctx.n_bits as usize)) & var_mask;
        env.ints.insert(var.name().to_string(), value as u128);
    }
    for (i, var) in ctx.svars.iter().enumerate() {
        let bit = (subst >> (ctx.nvars.len() * ctx.n_bits as usize + i)) & 1;
        env.strings.insert(var.name().to_string(), bit.to_string());
    }
    env
}

fn packet(subst: u32, ctx: &TerminalCtx) -> Packet {
    let mut packet = Packet::new();
    let var_mask = (1u32 << ctx.n_bits) - 1;
    for i in 0..ctx.nvars.len() {
        let value = (subst >> (i * ctx.n_bits as usize)) & var_mask;
        packet.set(FieldId::Reg(i as u8), value as u128);
    }
    for i in 0..ctx.svars.len() {
        let bit = (subst >> (ctx.nvars.len() * ctx.n_bits as usize + i)) & 1;
        packet.set(FieldId::Reg((ctx.nvars.len() + i) as u8), bit as u128);
    }
    packet
}

fn describe(subst: u32, ctx: &TerminalCtx) -> String {
    let mut parts = Vec::new();
    let var_mask = (1u32 << ctx.n_bits) - 1;
    for (i, var) in ctx.nvars.iter().enumerate() {
        let value = (subst >> (i * ctx.n_bits as usize)) & var_mask;
        parts.push(format!("{} = 0x{value:x}", var.name()));
    }
    for (i, var) in ctx.svars.iter().enumerate() {
        let bit = (subst >> (ctx.nvars.len() * ctx.n_bits as usize + i)) & 1;
        parts.push(format!("{} = \"{bit}\"", var.name()));
    }
    parts.join(", ")
}

/// Keeps up to `--parallel` worker processes alive, reaping in spawn
/// order; the first nonzero exit status aborts the run with that status.
struct WorkerPool {
    children: VecDeque<Child>,
    max: usize,
    args: Vec<String>,
    n_terminals: i32,
}

impl WorkerPool {
    fn new(cfg: &Config) -> WorkerPool {
        let args = vec![
            "--relops".to_string(),
            cfg.relops.to_string(),
            "--nvars".to_string(),
            cfg.nvars.to_string(),
            "--svars".to_string(),
            cfg.svars.to_string(),
            "--bits".to_string(),
            cfg.n_bits.to_string(),
            "--operation".to_string(),
            cfg.operation.as_str().to_string(),
        ];
        WorkerPool {
            children: VecDeque::new(),
            max: cfg.parallel.max(1),
            args,
            n_terminals: cfg.n_terminals,
        }
    }

    fn spawn(&mut self, job: usize) -> Result<(), i32> {
        if self.children.len() >= self.max {
            self.reap_one()?;
        }
        let exe = match std::env::current_exe() {
            Ok(exe) => exe,
            Err(err) => {
                eprintln!("cannot find own executable: {err}");
                return Err(2);
            }
        };
        let child = Command::new(exe)
            .args(&self.args)
            .arg("--shape-index")
            .arg(job.to_string())
            .arg("exhaustive")
            .arg(self.n_terminals.to_string())
            .spawn();
        match child {
            Ok(child) => {
                self.children.push_back(child);
                Ok(())
            }
            Err(err) => {
                eprintln!("cannot spawn worker: {err}");
                Err(2)
            }
        }
    }

    fn reap_one(&mut self) -> Result<(), i32> {
        let Some(mut child) = self.children.pop_front() else {
            return Ok(());
        };
        match child.wait() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                self.kill_all();
                Err(status.code().unwrap_or(1))
            }
            Err(err) => {
                eprintln!("waiting for worker failed: {err}");
                self.kill_all();
                Err(2)
            }
        }
    }

    fn finish(&mut self) -> Result<(), i32> {
        while !self.children.is_empty() {
            self.reap_one()?;
        }
        Ok(())
    }

    fn kill_all(&mut self) {
        for child in &mut self.children {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.children.clear();
    }
}
