//! End-to-end runs of the whole pipeline against a realistic symbol
//! catalogue.

use mexpr_core::prelude::*;

fn symtab() -> SymTable {
    let mut symtab = SymTable::new();
    symtab.add_string("inport", FieldId::Reg(6), None);
    symtab.add_field("xreg0", FieldId::Xreg(0), None, false);
    symtab.add_subfield("reg0", None, "xreg0[32..63]").expect("reg0");
    symtab.add_field("eth.src", FieldId::EthSrc, None, false);
    symtab.add_field("eth.type", FieldId::EthType, None, true);
    symtab.add_field("vlan.tci", FieldId::VlanTci, None, false);
    symtab.add_predicate("vlan.present", "vlan.tci[12]");
    symtab.add_subfield("vlan.pcp", Some("vlan.present"), "vlan.tci[13..15]").expect("vlan.pcp");
    symtab.add_predicate("ip4", "eth.type == 0x800");
    symtab.add_predicate("ip6", "eth.type == 0x86dd");
    symtab.add_predicate("ip", "ip4 || ip6");
    symtab.add_field("ip.proto", FieldId::IpProto, Some("ip"), true);
    symtab.add_field("ip4.src", FieldId::Ip4Src, Some("ip4"), false);
    symtab.add_field("ip4.dst", FieldId::Ip4Dst, Some("ip4"), false);
    symtab.add_predicate("tcp", "ip.proto == 6");
    symtab.add_field("tcp.src", FieldId::TcpSrc, Some("tcp"), false);
    symtab.add_field("tcp.dst", FieldId::TcpDst, Some("tcp"), false);
    symtab.add_field("self_recurse", FieldId::Reg(3), Some("self_recurse != 0"), false);
    symtab.add_field("mutual_recurse_1", FieldId::Reg(4), Some("mutual_recurse_2 != 0"), false);
    symtab.add_field("mutual_recurse_2", FieldId::Reg(5), Some("mutual_recurse_1 != 0"), false);
    symtab
}

fn ports() -> StringMap {
    let mut ports = StringMap::default();
    ports.insert("eth0".to_string(), 5);
    ports.insert("eth1".to_string(), 6);
    ports
}

fn compile(input: &str) -> Matches {
    let symtab = symtab();
    let expr = Expr::parse(input, &symtab)
        .and_then(|expr| expr.annotate(&symtab))
        .map(|expr| expr.simplify().normalize())
        .expect(input);
    assert!(expr.is_normalized(), "{input}");
    expr.to_matches(&ports())
}

#[test]
fn tcp_port_behind_predicates() {
    let matches = compile("ip4 && tcp.dst == 80");
    assert_eq!(matches.to_string(), "eth.type=0x800,ip.proto=6,tcp.dst=80\n");
    assert_eq!(matches.n_conjunctions(), 0);
}

#[test]
fn port_set_fans_out() {
    let symtab = symtab();
    let expr = Expr::parse("tcp.dst == {80, 443}", &symtab)
        .expect("parse")
        .simplify()
        .normalize();
    let matches = expr.to_matches(&ports());
    assert_eq!(matches.to_string(), "tcp.dst=80\ntcp.dst=443\n");
}

#[test]
fn cidr_is_a_single_masked_match() {
    let matches = compile("ip4.src == 10.0.0.0/8");
    assert_eq!(matches.to_string(), "eth.type=0x800,ip4.src=10.0.0.0/8\n");
}

#[test]
fn single_bit_subfield() {
    let matches = compile("eth.src[0] == 1");
    assert_eq!(matches.to_string(), "eth.src=00:00:00:00:00:01/00:00:00:00:00:01\n");
}

#[test]
fn conjunction_groups_pair_sets() {
    let symtab = symtab();
    let expr = Expr::parse("tcp.dst == {80, 443} && tcp.src == {1, 2}", &symtab)
        .expect("parse")
        .simplify()
        .normalize();
    let matches = expr.to_matches(&ports());
    assert_eq!(matches.n_conjunctions(), 1);
    assert_eq!(matches.len(), 4);
    assert!(matches.iter().all(|(_, conjunctions)| conjunctions.len() == 1));
}

#[test]
fn subfield_through_wide_register() {
    let symtab = symtab();
    let expr = Expr::parse("reg0 == 0xabcd", &symtab)
        .expect("parse")
        .annotate(&symtab)
        .expect("annotate");
    assert_eq!(expr.to_string(), "xreg0[32..63] == 43981");
}

#[test]
fn vlan_pcp_requires_vlan_present() {
    let symtab = symtab();
    let expr = Expr::parse("vlan.pcp == 4", &symtab)
        .expect("parse")
        .annotate(&symtab)
        .expect("annotate")
        .simplify()
        .normalize();
    // the presence bit and the priority window merge into one masked test
    assert_eq!(expr.to_string(), "vlan.tci[12..15] == 9");
    let matches = expr.to_matches(&ports());
    assert_eq!(matches.to_string(), "vlan.tci=0x9000/0xf000\n");
}

#[test]
fn self_recursion_fails_annotation() {
    let symtab = symtab();
    let expr = Expr::parse("self_recurse == 1", &symtab).expect("parse");
    assert!(matches!(
        expr.annotate(&symtab),
        Err(CompileError::PrereqCycle { name }) if name == "self_recurse"
    ));
}

#[test]
fn mutual_recursion_fails_annotation() {
    let symtab = symtab();
    let expr = Expr::parse("mutual_recurse_2 == 1", &symtab).expect("parse");
    assert!(matches!(
        expr.annotate(&symtab),
        Err(CompileError::PrereqCycle { .. })
    ));
}

#[test]
fn inport_disjunction_with_predicates() {
    let matches = compile("inport == {\"eth0\", \"eth1\"} && ip4");
    assert_eq!(matches.n_conjunctions(), 0);
    assert_eq!(matches.to_string(), "eth.type=0x800,reg6=5\neth.type=0x800,reg6=6\n");
}

#[test]
fn downstream_stages_refuse_errors() {
    let symtab = symtab();
    // the error comes from the first stage that sees the bad symbol
    assert!(matches!(
        Expr::parse("nonesuch == 1", &symtab),
        Err(CompileError::UnknownSymbol { .. })
    ));
}
