//! Test utility for the match-expression compiler.
//!
//! Reads test input from stdin one line at a time (blank lines and `#`
//! comments skipped) and prints results on stdout; enumeration and
//! exhaustive-test commands take their parameters on the command line.
//! Exit status is 0 on success and nonzero on the first property
//! violation, with a diagnostic on stderr.

use std::io::{self, BufRead};

use clap::{Arg, ArgAction, Command};
use tracing_subscriber::EnvFilter;

use mexpr_core::actions::parse_actions;
use mexpr_core::expr::{Expr, Relop};
use mexpr_core::fields::FieldId;
use mexpr_core::symtab::SymTable;
use mexpr_lex::{Lexer, Token};

mod catalogue;
mod eval;
mod exhaustive;
mod shapes;

use exhaustive::Operation;
use shapes::RelopSet;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let matches = cli().get_matches();

    let code = match matches.subcommand() {
        Some(("lex", _)) => {
            lex_lines();
            0
        }
        Some(("parse-expr", _)) => expr_lines(0),
        Some(("annotate-expr", _)) => expr_lines(1),
        Some(("simplify-expr", _)) => expr_lines(2),
        Some(("normalize-expr", _)) => expr_lines(3),
        Some(("expr-to-flows", _)) => expr_lines(4),
        Some(("evaluate-expr", sub)) => {
            let a = *sub.get_one::<u64>("A").expect("A");
            let b = *sub.get_one::<u64>("B").expect("B");
            let c = *sub.get_one::<u64>("C").expect("C");
            evaluate_lines(a, b, c);
            0
        }
        Some(("composition", sub)) => {
            let n = *sub.get_one::<i64>("N").expect("N") as i32;
            for composition in shapes::Compositions::new(n) {
                let text: Vec<String> = composition.iter().map(i32::to_string).collect();
                println!("{}", text.join(" "));
            }
            0
        }
        Some(("tree-shape", sub)) => {
            let n = *sub.get_one::<i64>("N").expect("N") as i32;
            let mut tree_shapes = shapes::init_shapes(n);
            loop {
                println!("{}", shapes::print_shapes(&tree_shapes));
                if !shapes::next_shapes(&mut tree_shapes) {
                    break;
                }
            }
            0
        }
        Some(("exhaustive", sub)) => {
            let relops = match sub.get_one::<String>("relops") {
                Some(text) => match parse_relops(text) {
                    Ok(relops) => relops,
                    Err(msg) => {
                        eprintln!("{msg}");
                        std::process::exit(2);
                    }
                },
                None => RelopSet::ALL,
            };
            let config = exhaustive::Config {
                n_terminals: *sub.get_one::<i64>("N").expect("N") as i32,
                nvars: *sub.get_one::<u64>("nvars").expect("nvars") as usize,
                svars: *sub.get_one::<u64>("svars").expect("svars") as usize,
                n_bits: *sub.get_one::<u64>("bits").expect("bits") as u32,
                relops,
                operation: Operation::parse(sub.get_one::<String>("operation").expect("operation"))
                    .expect("operation values are closed"),
                parallel: *sub.get_one::<u64>("parallel").expect("parallel") as usize,
                verbosity: sub.get_count("more"),
                shape_index: sub.get_one::<u64>("shape-index").map(|&i| i as usize),
            };
            exhaustive::run(&config)
        }
        Some(("parse-actions", _)) => {
            parse_actions_lines();
            0
        }
        _ => unreachable!("subcommand is required"),
    };
    std::process::exit(code);
}

fn cli() -> Command {
    Command::new("mexpr")
        .about("match-expression test utility")
        .arg_required_else_help(true)
        .arg(
            Arg::new("relops")
                .long("relops")
                .global(true)
                .value_name("OPERATORS")
                .help("test only these relational operators (space or comma separated)"),
        )
        .arg(
            Arg::new("nvars")
                .long("nvars")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(0..=4))
                .default_value("2")
                .help("number of numeric variables in exhaustive tests"),
        )
        .arg(
            Arg::new("svars")
                .long("svars")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(0..=4))
                .default_value("2")
                .help("number of string variables in exhaustive tests"),
        )
        .arg(
            Arg::new("bits")
                .long("bits")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..=3))
                .default_value("3")
                .help("bits per numeric variable in exhaustive tests"),
        )
        .arg(
            Arg::new("operation")
                .long("operation")
                .global(true)
                .value_parser(["convert", "simplify", "normalize", "flow"])
                .default_value("flow")
                .help("depth of the pipeline to test exhaustively"),
        )
        .arg(
            Arg::new("parallel")
                .long("parallel")
                .global(true)
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("1")
                .help("number of worker processes"),
        )
        .arg(
            Arg::new("more")
                .short('m')
                .long("more")
                .global(true)
                .action(ArgAction::Count)
                .help("increase verbosity"),
        )
        .arg(
            Arg::new("shape-index")
                .long("shape-index")
                .global(true)
                .hide(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .subcommand(Command::new("lex").about("lexically analyze stdin and print it back"))
        .subcommand(Command::new("parse-expr").about("parse expressions from stdin"))
        .subcommand(Command::new("annotate-expr").about("parse and annotate expressions"))
        .subcommand(Command::new("simplify-expr").about("parse, annotate and simplify"))
        .subcommand(Command::new("normalize-expr").about("parse through normalization"))
        .subcommand(Command::new("expr-to-flows").about("compile expressions to flows"))
        .subcommand(
            Command::new("evaluate-expr")
                .about("evaluate expressions over 3-bit fields a, b, c")
                .arg(pos_arg("A", clap::value_parser!(u64).range(0..=7)))
                .arg(pos_arg("B", clap::value_parser!(u64).range(0..=7)).index(2))
                .arg(pos_arg("C", clap::value_parser!(u64).range(0..=7)).index(3)),
        )
        .subcommand(
            Command::new("composition")
                .about("print the compositions of N")
                .arg(pos_arg("N", clap::value_parser!(i64).range(1..=50))),
        )
        .subcommand(
            Command::new("tree-shape")
                .about("print the tree shapes with N terminals")
                .arg(pos_arg("N", clap::value_parser!(i64).range(1..=50))),
        )
        .subcommand(
            Command::new("exhaustive")
                .about("test all N-terminal expressions against every property")
                .arg(pos_arg("N", clap::value_parser!(i64).range(1..=8))),
        )
        .subcommand(Command::new("parse-actions").about("parse action lists from stdin"))
}

fn pos_arg(name: &'static str, parser: impl Into<clap::builder::ValueParser>) -> Arg {
    Arg::new(name).required(true).value_parser(parser.into()).index(1)
}

fn parse_relops(text: &str) -> Result<RelopSet, String> {
    let mut set = RelopSet::empty();
    let mut lexer = Lexer::new(text);
    loop {
        let relop = match lexer.token() {
            Token::End => break,
            Token::Comma => {
                lexer.advance();
                continue;
            }
            Token::Eq => Relop::Eq,
            Token::Ne => Relop::Ne,
            Token::Lt => Relop::Lt,
            Token::Le => Relop::Le,
            Token::Gt => Relop::Gt,
            Token::Ge => Relop::Ge,
            other => return Err(format!("`{text}`: relational operator expected at `{other}`")),
        };
        set.insert(relop);
        lexer.advance();
    }
    if set.is_empty() {
        Err(format!("`{text}`: no relational operators"))
    } else {
        Ok(set)
    }
}

/// Runs `handle` over every test line on stdin, skipping blanks and `#`
/// comments.
fn for_each_line(mut handle: impl FnMut(&str)) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        handle(line);
    }
}

fn lex_lines() {
    for_each_line(|line| {
        let mut lexer = Lexer::new(line);
        let mut out = String::new();
        while *lexer.token() != Token::End {
            let formatted = lexer.token().to_string();
            if !matches!(lexer.token(), Token::Error(_)) {
                // formatting must be lossless over re-lexing
                let second = Lexer::new(&formatted);
                if !second.token().equivalent(lexer.token()) {
                    eprintln!("token `{formatted}` relexes as `{}`", second.token());
                }
            }
            out.push_str(&formatted);
            out.push(' ');
            lexer.advance();
        }
        println!("{}", out.trim_end());
    });
}

/// parse-expr and friends: increasing `steps` runs the line deeper into
/// the pipeline before printing it back.
fn expr_lines(steps: u32) -> i32 {
    let symtab = catalogue::create_symtab();
    let ports = catalogue::ports();
    for_each_line(|line| {
        tracing::debug!(line, steps, "compiling");
        let parsed = Expr::parse(line, &symtab)
            .and_then(|expr| if steps > 0 { expr.annotate(&symtab) } else { Ok(expr) });
        match parsed {
            Ok(mut expr) => {
                if steps > 1 {
                    expr = expr.simplify();
                }
                if steps > 2 {
                    expr = expr.normalize();
                    assert!(expr.is_normalized());
                }
                if steps > 3 {
                    print!("{}", expr.to_matches(&ports));
                } else {
                    println!("{expr}");
                }
            }
            Err(err) => println!("{err}"),
        }
    });
    0
}

fn evaluate_lines(a: u64, b: u64, c: u64) {
    let mut symtab = SymTable::new();
    symtab.add_field("xreg0", FieldId::Xreg(0), None, false);
    symtab.add_field("xreg1", FieldId::Xreg(1), None, false);
    symtab.add_field("xreg2", FieldId::Xreg(2), None, false);
    symtab.add_subfield("a", None, "xreg0[0..2]").expect("a");
    symtab.add_subfield("b", None, "xreg1[0..2]").expect("b");
    symtab.add_subfield("c", None, "xreg2[0..2]").expect("c");

    let mut env = eval::Assignment::default();
    env.ints.insert("xreg0".to_string(), a as u128);
    env.ints.insert("xreg1".to_string(), b as u128);
    env.ints.insert("xreg2".to_string(), c as u128);

    for_each_line(|line| {
        let result = Expr::parse(line, &symtab).and_then(|expr| expr.annotate(&symtab));
        match result {
            Ok(expr) => println!("{}", eval::evaluate(&expr, &env) as i32),
            Err(err) => println!("{err}"),
        }
    });
}

fn parse_actions_lines() {
    let symtab = catalogue::create_symtab();
    let ports = catalogue::ports();
    for_each_line(|line| match parse_actions(line, &symtab, &ports) {
        Ok(parsed) => {
            let actions: Vec<String> = parsed.actions.iter().map(ToString::to_string).collect();
            let prereqs = match parsed.prereqs {
                Some(expr) => expr.to_string(),
                None => "1".to_string(),
            };
            println!("actions={}, prereqs={}", actions.join(" "), prereqs);
        }
        Err(err) => println!("{err}"),
    });
}
