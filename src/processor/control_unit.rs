use std::collections::BTreeMap;

use super::data_path::DataPath;
use super::RuntimeError;
use crate::instructions::{Instruction, OpCode};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ProcessorState {
    Normal,
    Interruption,
}

/// Which half of a two-tick instruction (LOAD, STORE, JZ, JN) is about to execute. Single-tick
/// opcodes always run at `Zero` and leave the step reset to `Zero` when they finish.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum Step {
    #[default]
    Zero,
    One,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExitCode {
    Halted,
    TickLimitReached,
}

pub enum TickResult {
    Running,
    Exit(ExitCode),
}

/// Maps an absolute tick number to the `(port, byte)` event admitted on that tick, supplying
/// asynchronous input independent of program flow.
pub type Schedule = BTreeMap<u64, (i32, u8)>;

/// Fetches, decodes and microsteps one instruction at a time, driving the data path through its
/// named signals. Owns the program, call stack and interrupt state; holds the data path
/// exclusively for the duration of each tick (see spec.md §3, "Ownership").
pub struct ControlUnit {
    program: Vec<Instruction>,
    pc: usize,
    call_stack: Vec<usize>,
    call_stack_pointer: i32,
    tick: u64,
    tick_limit: u64,
    step: Step,
    interrupts_enabled: bool,
    interrupt_request: bool,
    state: ProcessorState,
    return_address: usize,
    handler_address: Option<usize>,
    schedule: Schedule,
    pub data_path: DataPath,
}

impl ControlUnit {
    pub fn new(
        program: Vec<Instruction>,
        data_path: DataPath,
        call_stack_capacity: usize,
        handler_address: Option<usize>,
        schedule: Schedule,
        tick_limit: u64,
    ) -> ControlUnit {
        ControlUnit {
            program,
            pc: 0,
            call_stack: vec![0; call_stack_capacity],
            call_stack_pointer: -1,
            tick: 0,
            tick_limit,
            step: Step::Zero,
            interrupts_enabled: false,
            interrupt_request: false,
            state: ProcessorState::Normal,
            return_address: 0,
            handler_address,
            schedule,
            data_path,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Runs until HALT or the tick limit; HALT is a normal stop, the tick limit is a warning
    /// surfaced as `ExitCode::TickLimitReached` with whatever output was produced so far.
    pub fn run(&mut self) -> Result<ExitCode, RuntimeError> {
        loop {
            if self.tick >= self.tick_limit {
                return Ok(ExitCode::TickLimitReached);
            }
            if let TickResult::Exit(code) = self.step_once()? {
                return Ok(code);
            }
        }
    }

    /// Executes exactly one micro-step and advances the tick counter by exactly one.
    pub fn step_once(&mut self) -> Result<TickResult, RuntimeError> {
        self.admit_interrupt();
        if self.interrupt_request && self.step == Step::Zero {
            self.return_address = self.pc;
            self.pc = self
                .handler_address
                .expect("INTR asserted without a registered handler");
            self.state = ProcessorState::Interruption;
            self.interrupt_request = false;
            self.tick += 1;
            return Ok(TickResult::Running);
        }

        if self.pc >= self.program.len() {
            return Err(RuntimeError::ProgramCounterOutOfRange(self.pc));
        }
        let instr = self.program[self.pc];
        self.execute(instr)
    }

    /// Consults the schedule for the current tick; admits the byte and raises INTR only while
    /// interrupts are enabled and no interrupt is already in flight.
    fn admit_interrupt(&mut self) {
        if let Some(&(port, value)) = self.schedule.get(&self.tick) {
            if self.interrupts_enabled && self.state == ProcessorState::Normal {
                self.data_path.io.push_input(port, value);
                self.interrupt_request = true;
            }
        }
    }

    fn execute(&mut self, instr: Instruction) -> Result<TickResult, RuntimeError> {
        match instr.opcode {
            OpCode::HALT => {
                self.tick += 1;
                return Ok(TickResult::Exit(ExitCode::Halted));
            }

            OpCode::IRET => {
                self.pc = self.return_address;
                self.state = ProcessorState::Normal;
                self.step = Step::Zero;
                self.tick += 1;
                return Ok(TickResult::Running);
            }

            OpCode::EINT => {
                self.interrupts_enabled = true;
                self.pc += 1;
            }
            OpCode::DINT => {
                self.interrupts_enabled = false;
                self.pc += 1;
            }
            OpCode::NOP => {
                self.pc += 1;
            }

            OpCode::LIT => {
                self.data_path.set_cu_arg(instr.arg);
                self.data_path.sp_next()?;
                self.data_path.write_stack()?;
                self.data_path.tos_cu_arg();
                self.pc += 1;
            }
            OpCode::IN => {
                self.data_path.set_cu_arg(instr.arg);
                self.data_path.sp_next()?;
                self.data_path.write_stack()?;
                self.data_path.tos_in()?;
                self.pc += 1;
            }
            OpCode::OUT => {
                if !(crate::constants::OUT_PORT_MIN..=crate::constants::OUT_PORT_MAX)
                    .contains(&instr.arg)
                {
                    return Err(RuntimeError::Io(crate::io::IoError::InvalidOutputPort(
                        instr.arg,
                    )));
                }
                self.data_path.set_cu_arg(instr.arg);
                self.data_path.port_write()?;
                self.data_path.tos_stack()?;
                self.data_path.sp_prev()?;
                self.pc += 1;
            }

            OpCode::DUP => {
                self.data_path.sp_next()?;
                self.data_path.write_stack()?;
                self.pc += 1;
            }
            OpCode::DROP => {
                self.data_path.tos_stack()?;
                self.data_path.sp_prev()?;
                self.pc += 1;
            }
            OpCode::SWAP => {
                self.data_path.swap()?;
                self.pc += 1;
            }

            OpCode::INC | OpCode::DEC | OpCode::NOT => {
                self.data_path.alu_unary(instr.opcode);
                self.data_path.tos_alu();
                self.pc += 1;
            }
            OpCode::ADD | OpCode::SUB | OpCode::AND | OpCode::OR | OpCode::XOR | OpCode::MUL
            | OpCode::MULH | OpCode::DIV => {
                self.data_path.alu_binary(instr.opcode)?;
                self.data_path.sp_prev()?;
                self.data_path.tos_alu();
                self.pc += 1;
            }

            OpCode::LOAD => match self.step {
                Step::Zero => {
                    self.data_path.latch_address();
                    self.step = Step::One;
                    self.tick += 1;
                    return Ok(TickResult::Running);
                }
                Step::One => {
                    self.data_path.tos_mem()?;
                    self.pc += 1;
                }
            },
            OpCode::STORE => match self.step {
                Step::Zero => {
                    self.data_path.latch_address();
                    self.data_path.tos_stack()?;
                    self.data_path.sp_prev()?;
                    self.step = Step::One;
                    self.tick += 1;
                    return Ok(TickResult::Running);
                }
                Step::One => {
                    self.data_path.memory_store()?;
                    self.data_path.tos_stack()?;
                    self.data_path.sp_prev()?;
                    self.pc += 1;
                }
            },

            OpCode::JUMP => {
                self.pc = self.data_path.tos() as usize;
                self.data_path.tos_stack()?;
                self.data_path.sp_prev()?;
            }
            OpCode::JZ => match self.step {
                Step::Zero => {
                    self.data_path.latch_zero_flag();
                    self.data_path.tos_stack()?;
                    self.data_path.sp_prev()?;
                    self.step = Step::One;
                    self.tick += 1;
                    return Ok(TickResult::Running);
                }
                Step::One => {
                    if self.data_path.flags.z {
                        self.pc = self.data_path.tos() as usize;
                    } else {
                        self.pc += 1;
                    }
                    self.data_path.tos_stack()?;
                    self.data_path.sp_prev()?;
                }
            },
            OpCode::JN => match self.step {
                Step::Zero => {
                    self.data_path.latch_negative_flag();
                    self.data_path.tos_stack()?;
                    self.data_path.sp_prev()?;
                    self.step = Step::One;
                    self.tick += 1;
                    return Ok(TickResult::Running);
                }
                Step::One => {
                    if self.data_path.flags.n {
                        self.pc = self.data_path.tos() as usize;
                    } else {
                        self.pc += 1;
                    }
                    self.data_path.tos_stack()?;
                    self.data_path.sp_prev()?;
                }
            },

            OpCode::CALL => {
                let target = self.data_path.tos() as usize;
                self.scp_next()?;
                self.pc = target;
                self.data_path.tos_stack()?;
                self.data_path.sp_prev()?;
            }
            OpCode::RET => {
                self.scp_prev_and_return()?;
            }
        }
        self.step = Step::Zero;
        self.tick += 1;
        Ok(TickResult::Running)
    }

    fn scp_next(&mut self) -> Result<(), RuntimeError> {
        if self.call_stack_pointer + 1 >= self.call_stack.len() as i32 {
            return Err(RuntimeError::CallStackOverflow);
        }
        self.call_stack_pointer += 1;
        self.call_stack[self.call_stack_pointer as usize] = self.pc + 1;
        Ok(())
    }

    fn scp_prev_and_return(&mut self) -> Result<(), RuntimeError> {
        if self.call_stack_pointer < 0 {
            return Err(RuntimeError::CallStackUnderflow);
        }
        self.pc = self.call_stack[self.call_stack_pointer as usize];
        self.call_stack[self.call_stack_pointer as usize] = 0;
        self.call_stack_pointer -= 1;
        Ok(())
    }
}
