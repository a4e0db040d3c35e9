//! The two-pass assembler. Pass one walks the raw program once to assign every data
//! declaration and code label an address; pass two resolves each instruction's argument
//! against that symbol table and emits the packed binary form. Grounded in the shape of the
//! original translator's `first_stage`/`second_stage` split, adapted to a structured AST
//! instead of re-tokenizing text.

use std::collections::HashMap;
use std::fmt;

use stackvm::{Instruction, OpCode};
use util::EnumFromStr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawArg {
    Number(i32),
    Symbol(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawInstruction {
    pub label: Option<String>,
    pub mnemonic: String,
    pub arg: Option<RawArg>,
}

impl RawInstruction {
    pub fn new(mnemonic: &str) -> RawInstruction {
        RawInstruction {
            label: None,
            mnemonic: mnemonic.to_string(),
            arg: None,
        }
    }

    pub fn with_arg(mnemonic: &str, arg: RawArg) -> RawInstruction {
        RawInstruction {
            label: None,
            mnemonic: mnemonic.to_string(),
            arg: Some(arg),
        }
    }

    pub fn labeled(mut self, label: &str) -> RawInstruction {
        self.label = Some(label.to_string());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataDecl {
    Var { name: String, initial: i32 },
    Array { name: String, len: usize },
    Bytes { name: String, bytes: Vec<u8> },
}

impl DataDecl {
    pub fn name(&self) -> &str {
        match self {
            DataDecl::Var { name, .. } => name,
            DataDecl::Array { name, .. } => name,
            DataDecl::Bytes { name, .. } => name,
        }
    }

    fn len(&self) -> usize {
        match self {
            DataDecl::Var { .. } => 1,
            DataDecl::Array { len, .. } => *len,
            DataDecl::Bytes { bytes, .. } => bytes.len() + 1, // + NUL terminator
        }
    }

    fn words(&self) -> Vec<i32> {
        match self {
            DataDecl::Var { initial, .. } => vec![*initial],
            DataDecl::Array { len, .. } => vec![0; *len],
            DataDecl::Bytes { bytes, .. } => {
                let mut words: Vec<i32> = bytes.iter().map(|&b| b as i32).collect();
                words.push(0);
                words
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawProgram {
    pub data: Vec<DataDecl>,
    pub code: Vec<RawInstruction>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsmError {
    InvalidLabel(String),
    DuplicateSymbol(String),
    UndefinedSymbol(String),
    UnknownMnemonic(String),
    MissingImmediate(String),
    UnexpectedImmediate(String),
    ImmediateOutOfRange(String, i32),
    MissingInterruptHandler,
    HandlerMissingIret,
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::InvalidLabel(name) => write!(f, "\"{}\" is not a valid label name", name),
            AsmError::DuplicateSymbol(name) => write!(f, "symbol \"{}\" is defined more than once", name),
            AsmError::UndefinedSymbol(name) => write!(f, "reference to undefined symbol \"{}\"", name),
            AsmError::UnknownMnemonic(m) => write!(f, "unrecognized mnemonic \"{}\"", m),
            AsmError::MissingImmediate(m) => write!(f, "\"{}\" requires an immediate argument", m),
            AsmError::UnexpectedImmediate(m) => write!(f, "\"{}\" does not take an argument", m),
            AsmError::ImmediateOutOfRange(m, arg) => {
                write!(f, "\"{}\"'s argument {} does not fit in a signed 26-bit field", m, arg)
            }
            AsmError::MissingInterruptHandler => write!(
                f,
                "program uses eint but declares no \"interrupt_handler\" procedure"
            ),
            AsmError::HandlerMissingIret => {
                write!(f, "\"interrupt_handler\" does not end in iret")
            }
        }
    }
}

impl std::error::Error for AsmError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assembled {
    pub code: Vec<Instruction>,
    pub data: Vec<i32>,
    pub handler_address: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Symbol {
    Data(i32),
    Code(usize),
}

fn is_valid_label(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Runs both assembler passes over `program`, returning packed instructions, the flattened
/// data image and the interrupt handler's resolved address, if any.
pub fn assemble(program: &RawProgram) -> Result<Assembled, AsmError> {
    let mut symbols: HashMap<String, Symbol> = HashMap::new();

    // Pass 1: assign every data declaration and code label an address.
    let mut data_address = 0i32;
    for decl in &program.data {
        if !is_valid_label(decl.name()) {
            return Err(AsmError::InvalidLabel(decl.name().to_string()));
        }
        if symbols.contains_key(decl.name()) {
            return Err(AsmError::DuplicateSymbol(decl.name().to_string()));
        }
        symbols.insert(decl.name().to_string(), Symbol::Data(data_address));
        data_address += decl.len() as i32;
    }

    for (pc, instr) in program.code.iter().enumerate() {
        if let Some(label) = &instr.label {
            if !is_valid_label(label) {
                return Err(AsmError::InvalidLabel(label.clone()));
            }
            if symbols.contains_key(label) {
                return Err(AsmError::DuplicateSymbol(label.clone()));
            }
            symbols.insert(label.clone(), Symbol::Code(pc));
        }
    }

    // Pass 2: resolve each instruction's argument and encode it.
    let mut code = Vec::with_capacity(program.code.len());
    let mut uses_eint = false;
    for raw in &program.code {
        let opcode = OpCode::from_str(&raw.mnemonic)
            .map_err(|_| AsmError::UnknownMnemonic(raw.mnemonic.clone()))?;
        if opcode == OpCode::EINT {
            uses_eint = true;
        }

        let arg = match (&raw.arg, opcode.has_immediate()) {
            (None, false) => 0,
            (None, true) => return Err(AsmError::MissingImmediate(raw.mnemonic.clone())),
            (Some(_), false) => return Err(AsmError::UnexpectedImmediate(raw.mnemonic.clone())),
            (Some(RawArg::Number(n)), true) => *n,
            (Some(RawArg::Symbol(name)), true) => match symbols.get(name) {
                Some(Symbol::Data(addr)) => *addr,
                Some(Symbol::Code(pc)) => *pc as i32,
                None => return Err(AsmError::UndefinedSymbol(name.clone())),
            },
        };

        let instr = Instruction::new(opcode, arg);
        stackvm::encode_instruction(&instr)
            .map_err(|_| AsmError::ImmediateOutOfRange(raw.mnemonic.clone(), arg))?;
        code.push(instr);
    }

    let handler_address = symbols.get("interrupt_handler").and_then(|s| match s {
        Symbol::Code(pc) => Some(*pc),
        Symbol::Data(_) => None,
    });

    if uses_eint {
        let handler_pc = handler_address.ok_or(AsmError::MissingInterruptHandler)?;
        let next_label_pc = program
            .code
            .iter()
            .enumerate()
            .skip(handler_pc + 1)
            .find(|(_, instr)| instr.label.is_some())
            .map(|(pc, _)| pc)
            .unwrap_or(code.len());
        let has_iret = code[handler_pc..next_label_pc]
            .iter()
            .any(|instr| instr.opcode == OpCode::IRET);
        if !has_iret {
            return Err(AsmError::HandlerMissingIret);
        }
    }

    let mut data = Vec::with_capacity(data_address as usize);
    for decl in &program.data {
        data.extend(decl.words());
    }

    Ok(Assembled {
        code,
        data,
        handler_address,
    })
}
