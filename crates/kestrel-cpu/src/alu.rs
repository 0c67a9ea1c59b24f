//! Flag-generating arithmetic helpers for the binary register ops.
//!
//! Every ALU op clears ZERO and NEGATIVE and recomputes them from its
//! result. CARRY and OVERFLOW are only ever *set*, by ADD and SUB, and are
//! otherwise left at their previous values; the three machine control bits
//! in the top of EFLAGS are never touched here.

use kestrel_isa::{EF_CARRY, EF_NEGATIVE, EF_OVERFLOW, EF_ZERO};

const MSB: u64 = 1 << 63;

/// Clear the per-result flags ahead of an ALU op.
#[inline]
pub(crate) fn begin_op(eflags: &mut u64) {
    *eflags &= !(EF_ZERO | EF_NEGATIVE);
}

/// Set ZERO/NEGATIVE from the op's result.
#[inline]
pub(crate) fn finish_op(eflags: &mut u64, result: u64) {
    if result == 0 {
        *eflags |= EF_ZERO;
    }
    if result & MSB != 0 {
        *eflags |= EF_NEGATIVE;
    }
}

pub(crate) fn add(eflags: &mut u64, o1: u64, o2: u64) -> u64 {
    let result = o1.wrapping_add(o2);
    if (o1 ^ result) & (o2 ^ result) & MSB != 0 {
        *eflags |= EF_OVERFLOW;
    }
    if result < o1 {
        *eflags |= EF_CARRY;
    }
    result
}

pub(crate) fn sub(eflags: &mut u64, o1: u64, o2: u64) -> u64 {
    let result = o1.wrapping_sub(o2);
    if (o1 ^ o2) & (o1 ^ result) & MSB != 0 {
        *eflags |= EF_OVERFLOW;
    }
    // Carry records the borrow (x86 semantics).
    if o2 > o1 {
        *eflags |= EF_CARRY;
    }
    result
}
