//! # Field registry
//!
//! The concrete packet and register fields a match expression can lower
//! onto. A [FieldId] names a bit slot in the flow; the registry fixes its
//! width and the format its constants are displayed in. Symbols declared in
//! a [SymTable](crate::symtab::SymTable) bind names to these fields.

use std::fmt::{self, Display, Formatter};

use mexpr_lex::IntFormat;

/// Identifier of a concrete match field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldId {
    EthSrc,
    EthDst,
    EthType,
    VlanTci,
    IpProto,
    IpDscp,
    IpEcn,
    IpTtl,
    IpFrag,
    Ip4Src,
    Ip4Dst,
    Ip6Src,
    Ip6Dst,
    Ip6Label,
    Icmp4Type,
    Icmp4Code,
    Icmp6Type,
    Icmp6Code,
    ArpOp,
    ArpSpa,
    ArpTpa,
    ArpSha,
    ArpTha,
    NdTarget,
    NdSll,
    NdTll,
    TcpSrc,
    TcpDst,
    TcpFlags,
    UdpSrc,
    UdpDst,
    SctpSrc,
    SctpDst,
    /// 32-bit scratch register `regN`.
    Reg(u8),
    /// 64-bit scratch register `xregN`.
    Xreg(u8),
}

impl FieldId {
    /// Width of the field in bits, at most 128.
    pub fn width(self) -> u32 {
        use FieldId::*;
        match self {
            EthSrc | EthDst | ArpSha | ArpTha | NdSll | NdTll => 48,
            EthType | VlanTci | ArpOp | TcpSrc | TcpDst | UdpSrc | UdpDst | SctpSrc
            | SctpDst => 16,
            TcpFlags => 12,
            IpProto | IpTtl | Icmp4Type | Icmp4Code | Icmp6Type | Icmp6Code => 8,
            IpDscp => 6,
            IpEcn | IpFrag => 2,
            Ip4Src | Ip4Dst | ArpSpa | ArpTpa => 32,
            Ip6Src | Ip6Dst | NdTarget => 128,
            Ip6Label => 20,
            Reg(_) => 32,
            Xreg(_) => 64,
        }
    }

    /// Display format for constants compared against this field.
    pub fn format(self) -> IntFormat {
        use FieldId::*;
        match self {
            EthSrc | EthDst | ArpSha | ArpTha | NdSll | NdTll => IntFormat::Ethernet,
            Ip4Src | Ip4Dst | ArpSpa | ArpTpa => IntFormat::Ipv4,
            Ip6Src | Ip6Dst | NdTarget => IntFormat::Ipv6,
            EthType | VlanTci | TcpFlags => IntFormat::Hexadecimal,
            _ => IntFormat::Decimal,
        }
    }
}

impl Display for FieldId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use FieldId::*;
        match self {
            EthSrc => f.write_str("eth.src"),
            EthDst => f.write_str("eth.dst"),
            EthType => f.write_str("eth.type"),
            VlanTci => f.write_str("vlan.tci"),
            IpProto => f.write_str("ip.proto"),
            IpDscp => f.write_str("ip.dscp"),
            IpEcn => f.write_str("ip.ecn"),
            IpTtl => f.write_str("ip.ttl"),
            IpFrag => f.write_str("ip.frag"),
            Ip4Src => f.write_str("ip4.src"),
            Ip4Dst => f.write_str("ip4.dst"),
            Ip6Src => f.write_str("ip6.src"),
            Ip6Dst => f.write_str("ip6.dst"),
            Ip6Label => f.write_str("ip6.label"),
            Icmp4Type => f.write_str("icmp4.type"),
            Icmp4Code => f.write_str("icmp4.code"),
            Icmp6Type => f.write_str("icmp6.type"),
            Icmp6Code => f.write_str("icmp6.code"),
            ArpOp => f.write_str("arp.op"),
            ArpSpa => f.write_str("arp.spa"),
            ArpTpa => f.write_str("arp.tpa"),
            ArpSha => f.write_str("arp.sha"),
            ArpTha => f.write_str("arp.tha"),
            NdTarget => f.write_str("nd.target"),
            NdSll => f.write_str("nd.sll"),
            NdTll => f.write_str("nd.tll"),
            TcpSrc => f.write_str("tcp.src"),
            TcpDst => f.write_str("tcp.dst"),
            TcpFlags => f.write_str("tcp.flags"),
            UdpSrc => f.write_str("udp.src"),
            UdpDst => f.write_str("udp.dst"),
            SctpSrc => f.write_str("sctp.src"),
            SctpDst => f.write_str("sctp.dst"),
            Reg(i) => write!(f, "reg{i}"),
            Xreg(i) => write!(f, "xreg{i}"),
        }
    }
}
