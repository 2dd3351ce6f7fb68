//! The symbol catalogue and port map the data-driven commands run
//! against: the usual L2/L3/L4 fields, the derived protocol predicates,
//! the register aliases, and a few deliberately broken entries for
//! negative testing.

use mexpr_core::fields::FieldId;
use mexpr_core::matches::StringMap;
use mexpr_core::symtab::SymTable;

pub fn create_symtab() -> SymTable {
    let mut symtab = SymTable::new();

    // logical ports are strings resolved through the port map
    symtab.add_string("inport", FieldId::Reg(6), None);
    symtab.add_string("outport", FieldId::Reg(7), None);

    symtab.add_field("xreg0", FieldId::Xreg(0), None, false);
    symtab.add_field("xreg1", FieldId::Xreg(1), None, false);
    symtab.add_field("xreg2", FieldId::Xreg(2), None, false);

    symtab.add_subfield("reg0", None, "xreg0[32..63]").expect("reg0");
    symtab.add_subfield("reg1", None, "xreg0[0..31]").expect("reg1");
    symtab.add_subfield("reg2", None, "xreg1[32..63]").expect("reg2");
    symtab.add_subfield("reg3", None, "xreg1[0..31]").expect("reg3");
    symtab.add_subfield("reg4", None, "xreg2[32..63]").expect("reg4");
    symtab.add_subfield("reg5", None, "xreg2[0..31]").expect("reg5");

    symtab.add_field("eth.src", FieldId::EthSrc, None, false);
    symtab.add_field("eth.dst", FieldId::EthDst, None, false);
    symtab.add_field("eth.type", FieldId::EthType, None, true);

    symtab.add_field("vlan.tci", FieldId::VlanTci, None, false);
    symtab.add_predicate("vlan.present", "vlan.tci[12]");
    symtab.add_subfield("vlan.pcp", Some("vlan.present"), "vlan.tci[13..15]").expect("vlan.pcp");
    symtab.add_subfield("vlan.vid", Some("vlan.present"), "vlan.tci[0..11]").expect("vlan.vid");

    symtab.add_predicate("ip4", "eth.type == 0x800");
    symtab.add_predicate("ip6", "eth.type == 0x86dd");
    symtab.add_predicate("ip", "ip4 || ip6");
    symtab.add_field("ip.proto", FieldId::IpProto, Some("ip"), true);
    symtab.add_field("ip.dscp", FieldId::IpDscp, Some("ip"), false);
    symtab.add_field("ip.ecn", FieldId::IpEcn, Some("ip"), false);
    symtab.add_field("ip.ttl", FieldId::IpTtl, Some("ip"), false);

    symtab.add_field("ip4.src", FieldId::Ip4Src, Some("ip4"), false);
    symtab.add_field("ip4.dst", FieldId::Ip4Dst, Some("ip4"), false);

    symtab.add_predicate("icmp4", "ip4 && ip.proto == 1");
    symtab.add_field("icmp4.type", FieldId::Icmp4Type, Some("icmp4"), false);
    symtab.add_field("icmp4.code", FieldId::Icmp4Code, Some("icmp4"), false);

    symtab.add_field("ip6.src", FieldId::Ip6Src, Some("ip6"), false);
    symtab.add_field("ip6.dst", FieldId::Ip6Dst, Some("ip6"), false);
    symtab.add_field("ip6.label", FieldId::Ip6Label, Some("ip6"), false);

    symtab.add_predicate("icmp6", "ip6 && ip.proto == 58");
    symtab.add_field("icmp6.type", FieldId::Icmp6Type, Some("icmp6"), true);
    symtab.add_field("icmp6.code", FieldId::Icmp6Code, Some("icmp6"), true);

    symtab.add_predicate("icmp", "icmp4 || icmp6");

    symtab.add_field("ip.frag", FieldId::IpFrag, Some("ip"), false);
    symtab.add_predicate("ip.is_frag", "ip.frag[0]");
    symtab.add_predicate("ip.later_frag", "ip.frag[1]");
    symtab.add_predicate("ip.first_frag", "ip.is_frag && !ip.later_frag");

    symtab.add_predicate("arp", "eth.type == 0x806");
    symtab.add_field("arp.op", FieldId::ArpOp, Some("arp"), false);
    symtab.add_field("arp.spa", FieldId::ArpSpa, Some("arp"), false);
    symtab.add_field("arp.sha", FieldId::ArpSha, Some("arp"), false);
    symtab.add_field("arp.tpa", FieldId::ArpTpa, Some("arp"), false);
    symtab.add_field("arp.tha", FieldId::ArpTha, Some("arp"), false);

    symtab.add_predicate("nd", "icmp6.type == {135, 136} && icmp6.code == 0");
    symtab.add_field("nd.target", FieldId::NdTarget, Some("nd"), false);
    symtab.add_field("nd.sll", FieldId::NdSll, Some("nd && icmp6.type == 135"), false);
    symtab.add_field("nd.tll", FieldId::NdTll, Some("nd && icmp6.type == 136"), false);

    symtab.add_predicate("tcp", "ip.proto == 6");
    symtab.add_field("tcp.src", FieldId::TcpSrc, Some("tcp"), false);
    symtab.add_field("tcp.dst", FieldId::TcpDst, Some("tcp"), false);
    symtab.add_field("tcp.flags", FieldId::TcpFlags, Some("tcp"), false);

    symtab.add_predicate("udp", "ip.proto == 17");
    symtab.add_field("udp.src", FieldId::UdpSrc, Some("udp"), false);
    symtab.add_field("udp.dst", FieldId::UdpDst, Some("udp"), false);

    symtab.add_predicate("sctp", "ip.proto == 132");
    symtab.add_field("sctp.src", FieldId::SctpSrc, Some("sctp"), false);
    symtab.add_field("sctp.dst", FieldId::SctpDst, Some("sctp"), false);

    // for negative testing
    symtab.add_field("bad_prereq", FieldId::Reg(2), Some("xyzzy"), false);
    symtab.add_field("self_recurse", FieldId::Reg(3), Some("self_recurse != 0"), false);
    symtab.add_field("mutual_recurse_1", FieldId::Reg(4), Some("mutual_recurse_2 != 0"), false);
    symtab.add_field("mutual_recurse_2", FieldId::Reg(5), Some("mutual_recurse_1 != 0"), false);
    symtab.add_string("big_string", FieldId::Xreg(2), None);

    symtab
}

pub fn ports() -> StringMap {
    let mut ports = StringMap::default();
    ports.insert("eth0".to_string(), 5);
    ports.insert("eth1".to_string(), 6);
    ports.insert("LOCAL".to_string(), 0xfffe);
    ports
}
