//! The stack machine's instruction set, binary codec, data path and control unit: the
//! microcoded core that `simulator` drives and that `asm`/`image` target when producing
//! executables.

pub mod constants;
pub mod instructions;
pub mod io;
pub mod memory;
pub mod processor;

pub use instructions::{decode_instruction, encode_instruction, CodecError, Instruction, OpCode};
pub use io::{IoController, IoError};
pub use memory::{DataMemory, MemoryError};
pub use processor::{ControlUnit, DataPath, ExitCode, RuntimeError, Schedule, TickResult};

#[cfg(test)]
mod test;
