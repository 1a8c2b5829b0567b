//! Protocol-level constants shared with the producer (spec.md §6). These
//! offsets and masks are compatibility-critical and MUST NOT change.

use crate::predicate::Predicate;

pub const IDX_OFF_DEFAULT: usize = 0x10;
pub const FLAG_OFF_DEFAULT: usize = 0x13C;
pub const FLAG_MASK_DEFAULT: u32 = 0x0000_0004;

/// Idempotent set-bits applied by preflight: offset -> OR mask.
pub const SET_BITS: &[(usize, u32)] = &[
    (0x028, 0x0000_0001),
    (0x138, 0x436C_6125),
    (0x1C4, 0x0000_0001),
    (0x4A8, 0x0000_0001),
    (0x5B0, 0x436C_6125),
    (0x63C, 0x0000_0001),
    (0x640, 0x0000_0001),
    (0x648, 0x0001_01F4),
];

/// ACK candidate ranges, scanned in order before the fallback.
pub const ACK_RANGES_DEFAULT: &[(usize, usize)] = &[(0x014, 0x200), (0x200, 0x400)];

/// Bounded fallback range, scanned only if no range offset wins.
pub const ACK_FALLBACK_DEFAULT: (usize, usize) = (0x040, 0x20000);

/// Health predicates: offset -> predicate (spec.md §6).
pub fn default_predicates() -> Vec<(usize, Predicate)> {
    vec![
        (0x138, Predicate::Eq(0xEBEE_EBAF)),
        (0x1C4, Predicate::NZ),
        (0x63C, Predicate::NZ),
        (0x648, Predicate::NZ),
        (0x640, Predicate::OneOf(vec![0x1, 0x2])),
        (0x4A8, Predicate::OneOf(vec![0x0, 0x14])),
    ]
}
