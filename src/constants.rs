/// Width of the opcode field, in bits. The remaining low bits carry the immediate.
pub const OPCODE_BITS: u32 = 6;

/// Width of the immediate field, in bits (signed, two's complement).
pub const IMMEDIATE_BITS: u32 = 32 - OPCODE_BITS;

pub const IMMEDIATE_MASK: u32 = (1 << IMMEDIATE_BITS) - 1;
pub const IMMEDIATE_SIGN_BIT: u32 = 1 << (IMMEDIATE_BITS - 1);

/// Smallest and largest value an immediate may hold: -2^25 <= arg < 2^25.
pub const IMMEDIATE_MIN: i32 = -(1 << (IMMEDIATE_BITS - 1));
pub const IMMEDIATE_MAX: i32 = (1 << (IMMEDIATE_BITS - 1)) - 1;

/// Sentinel interrupt vector written when the program has no handler.
pub const NO_HANDLER: u32 = 0xFFFF_FFFF;

/// Output port range, inclusive. Port 0 is reserved for input.
pub const OUT_PORT_MIN: i32 = 1;
pub const OUT_PORT_MAX: i32 = 7;
pub const IN_PORT: i32 = 0;

pub const DEFAULT_STACK_CAPACITY: usize = 64;
pub const DEFAULT_CALL_STACK_CAPACITY: usize = 32;
pub const DEFAULT_TICK_LIMIT: u64 = 1_000_000;
