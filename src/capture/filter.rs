//! Classic BPF programs selecting PMTUD signals.
//!
//! The programs run in the kernel on Ethernet frames, so only
//! "fragmentation needed" and "packet too big" messages ever reach
//! user space. Accepting returns [`SNAP_LEN`], which also bounds how
//! much of each frame is copied.

use crate::capture::SNAP_LEN;
use crate::Family;

// Opcodes (identical layout on Linux and the BSDs)
const BPF_LD: u16 = 0x00;
const BPF_LDX: u16 = 0x01;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_H: u16 = 0x08;
const BPF_B: u16 = 0x10;
const BPF_ABS: u16 = 0x20;
const BPF_IND: u16 = 0x40;
const BPF_MSH: u16 = 0xa0;
const BPF_JEQ: u16 = 0x10;
const BPF_JSET: u16 = 0x40;
const BPF_K: u16 = 0x00;

const ETHERTYPE_IPV4: u32 = 0x0800;
const ETHERTYPE_IPV6: u32 = 0x86dd;
const IPPROTO_ICMP: u32 = 1;
const IPPROTO_ICMPV6: u32 = 58;

const ICMP_DEST_UNREACHABLE: u32 = 3;
const ICMP_FRAG_NEEDED: u32 = 4;
const ICMPV6_PACKET_TOO_BIG: u32 = 2;

// Frame offsets, Ethernet header included
const OFF_ETHERTYPE: u32 = 12;
const OFF_IPV4: u32 = 14;
const OFF_IPV4_PROTO: u32 = OFF_IPV4 + 9;
const OFF_IPV4_FRAG: u32 = OFF_IPV4 + 6;
const OFF_IPV6_NEXT_HEADER: u32 = 14 + 6;
const OFF_ICMPV6_TYPE: u32 = 14 + 40;

const IPV4_FRAG_OFFSET_MASK: u32 = 0x1fff;

/// One classic BPF instruction, laid out like the kernel's `sock_filter`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

const fn stmt(code: u16, k: u32) -> Instruction {
    Instruction { code, jt: 0, jf: 0, k }
}

const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Instruction {
    Instruction { code, jt, jf, k }
}

/// Filter for `family`.
pub fn program(family: Family) -> Vec<Instruction> {
    match family {
        Family::Ipv4 => fragmentation_needed(),
        Family::Ipv6 => packet_too_big(),
    }
}

/// `icmp and icmp[0] == 3 and icmp[1] == 4`
///
/// Non-first fragments are rejected because they carry no ICMP header.
fn fragmentation_needed() -> Vec<Instruction> {
    vec![
        stmt(BPF_LD | BPF_H | BPF_ABS, OFF_ETHERTYPE),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ETHERTYPE_IPV4, 0, 10),
        stmt(BPF_LD | BPF_B | BPF_ABS, OFF_IPV4_PROTO),
        jump(BPF_JMP | BPF_JEQ | BPF_K, IPPROTO_ICMP, 0, 8),
        stmt(BPF_LD | BPF_H | BPF_ABS, OFF_IPV4_FRAG),
        jump(BPF_JMP | BPF_JSET | BPF_K, IPV4_FRAG_OFFSET_MASK, 6, 0),
        // X = IPv4 header length
        stmt(BPF_LDX | BPF_B | BPF_MSH, OFF_IPV4),
        stmt(BPF_LD | BPF_B | BPF_IND, OFF_IPV4),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ICMP_DEST_UNREACHABLE, 0, 3),
        stmt(BPF_LD | BPF_B | BPF_IND, OFF_IPV4 + 1),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ICMP_FRAG_NEEDED, 0, 1),
        stmt(BPF_RET | BPF_K, SNAP_LEN as u32),
        stmt(BPF_RET | BPF_K, 0),
    ]
}

/// `icmp6 and ip6[40] == 2`
fn packet_too_big() -> Vec<Instruction> {
    vec![
        stmt(BPF_LD | BPF_H | BPF_ABS, OFF_ETHERTYPE),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ETHERTYPE_IPV6, 0, 5),
        stmt(BPF_LD | BPF_B | BPF_ABS, OFF_IPV6_NEXT_HEADER),
        jump(BPF_JMP | BPF_JEQ | BPF_K, IPPROTO_ICMPV6, 0, 3),
        stmt(BPF_LD | BPF_B | BPF_ABS, OFF_ICMPV6_TYPE),
        jump(BPF_JMP | BPF_JEQ | BPF_K, ICMPV6_PACKET_TOO_BIG, 0, 1),
        stmt(BPF_RET | BPF_K, SNAP_LEN as u32),
        stmt(BPF_RET | BPF_K, 0),
    ]
}
