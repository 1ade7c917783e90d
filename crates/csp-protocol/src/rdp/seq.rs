//! 16-bit wrapping sequence arithmetic.

/// `a` comes strictly before `b`, modulo 2^16.
pub fn seq_before(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// `seq` lies in the inclusive range `[start, end]`, which may wrap.
pub fn seq_between(seq: u16, start: u16, end: u16) -> bool {
    seq.wrapping_sub(start) <= end.wrapping_sub(start)
}
