//! Lowers a Forth-like token stream into `asm`'s raw program AST: integer literals become
//! `lit`, bare opcode words pass straight through, named `var`/`array`/`str` declarations
//! become hoisted data, `: name ... ;` becomes a labeled procedure, and the control-flow
//! words (`if`/`else`/`then`, `begin`/`again`, `exit`) and the `*2` widening-multiply macro
//! expand into plain instruction sequences the assembler never has to know are derived.

use std::collections::HashSet;
use std::fmt;

use asm::{DataDecl, RawArg, RawInstruction, RawProgram};
use lexer::{Tokens, STRING_PLACEHOLDER};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForthError {
    UnexpectedEnd,
    UndefinedWord(String),
    ExpectedNumber(String),
    ExpectedName(String),
    RedeclaredName(String),
    ComparisonWithoutIf,
    ElseWithoutIf,
    ThenWithoutIf,
    AgainWithoutBegin,
    UnterminatedProcedure(String),
    UnterminatedIf,
    UnterminatedBegin,
    NestedProcedure,
    UnexpectedString,
    ExitOutsideProcedure,
}

impl fmt::Display for ForthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForthError::UnexpectedEnd => write!(f, "unexpected end of source"),
            ForthError::UndefinedWord(w) => write!(f, "undefined word \"{}\"", w),
            ForthError::ExpectedNumber(w) => write!(f, "expected a number, found \"{}\"", w),
            ForthError::ExpectedName(w) => write!(f, "expected a name, found \"{}\"", w),
            ForthError::RedeclaredName(w) => write!(f, "\"{}\" is already declared", w),
            ForthError::ComparisonWithoutIf => write!(f, "comparison operator not followed by \"if\""),
            ForthError::ElseWithoutIf => write!(f, "\"else\" without a matching \"if\""),
            ForthError::ThenWithoutIf => write!(f, "\"then\" without a matching \"if\""),
            ForthError::AgainWithoutBegin => write!(f, "\"again\" without a matching \"begin\""),
            ForthError::UnterminatedProcedure(name) => {
                write!(f, "procedure \"{}\" is missing its closing \";\"", name)
            }
            ForthError::UnterminatedIf => write!(f, "\"if\" is missing its closing \"then\""),
            ForthError::UnterminatedBegin => write!(f, "\"begin\" is missing its closing \"again\""),
            ForthError::NestedProcedure => write!(f, "procedures cannot be nested"),
            ForthError::UnexpectedString => {
                write!(f, "a quoted string may only follow \"str\"")
            }
            ForthError::ExitOutsideProcedure => {
                write!(f, "\"exit\" may only appear inside a procedure body")
            }
        }
    }
}

impl std::error::Error for ForthError {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
}

enum ControlFrame {
    If { false_label: String, end_label: Option<String> },
    Begin { loop_label: String },
}

struct Lowerer<'a> {
    words: &'a [String],
    strings: std::collections::VecDeque<&'a str>,
    pos: usize,

    vars: HashSet<String>,
    procs: HashSet<String>,
    data: Vec<DataDecl>,

    main_code: Vec<RawInstruction>,
    proc_order: Vec<String>,
    proc_bodies: std::collections::HashMap<String, Vec<RawInstruction>>,
    current_proc: Option<String>,

    frames: Vec<ControlFrame>,
    pending_cmp: Option<CmpOp>,
    pending_label: Option<String>,

    if_counter: u32,
    begin_counter: u32,
    widen_declared: bool,
}

const TMP_WIDEN_A: &str = "_tmp_widen_a";
const TMP_WIDEN_B: &str = "_tmp_widen_b";
const TMP_WIDEN_LOW: &str = "_tmp_widen_low";

impl<'a> Lowerer<'a> {
    fn new(tokens: &'a Tokens) -> Lowerer<'a> {
        Lowerer {
            words: &tokens.words,
            strings: tokens.strings.iter().map(String::as_str).collect(),
            pos: 0,
            vars: HashSet::new(),
            procs: HashSet::new(),
            data: Vec::new(),
            main_code: Vec::new(),
            proc_order: Vec::new(),
            proc_bodies: std::collections::HashMap::new(),
            current_proc: None,
            frames: Vec::new(),
            pending_cmp: None,
            pending_label: None,
            if_counter: 0,
            begin_counter: 0,
            widen_declared: false,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.words.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Result<&'a str, ForthError> {
        let word = self.peek().ok_or(ForthError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(word)
    }

    fn next_name(&mut self) -> Result<String, ForthError> {
        let word = self.next()?;
        if word.parse::<i32>().is_ok() || !is_name(word) {
            return Err(ForthError::ExpectedName(word.to_string()));
        }
        Ok(word.to_string())
    }

    fn emit(&mut self, mut instr: RawInstruction) {
        if let Some(label) = self.pending_label.take() {
            instr.label = Some(label);
        }
        match &self.current_proc {
            Some(name) => self.proc_bodies.get_mut(name).unwrap().push(instr),
            None => self.main_code.push(instr),
        }
    }

    fn fresh_label(&mut self, prefix: &str) -> String {
        let n = if prefix == "begin" {
            self.begin_counter += 1;
            self.begin_counter
        } else {
            self.if_counter += 1;
            self.if_counter
        };
        format!("__{}_{}", prefix, n)
    }

    fn run(mut self) -> Result<RawProgram, ForthError> {
        while let Some(word) = self.peek() {
            self.step(word)?;
        }
        if let Some(name) = self.current_proc.clone() {
            return Err(ForthError::UnterminatedProcedure(name));
        }
        match self.frames.last() {
            Some(ControlFrame::If { .. }) => return Err(ForthError::UnterminatedIf),
            Some(ControlFrame::Begin { .. }) => return Err(ForthError::UnterminatedBegin),
            None => {}
        }
        if let Some(label) = self.pending_label.take() {
            self.emit(RawInstruction::new("nop").labeled(&label));
        }

        let mut code = self.main_code;
        for name in &self.proc_order {
            code.extend(self.proc_bodies.remove(name).unwrap());
        }
        Ok(RawProgram { data: self.data, code })
    }

    fn step(&mut self, word: &str) -> Result<(), ForthError> {
        match word {
            "var" => {
                self.pos += 1;
                let name = self.next_name()?;
                self.declare_var(&name)?;
                let initial = match self.peek().and_then(|w| w.parse::<i32>().ok()) {
                    Some(n) => {
                        self.pos += 1;
                        n
                    }
                    None => 0,
                };
                self.data.push(DataDecl::Var { name, initial });
            }
            "array" => {
                self.pos += 1;
                let name = self.next_name()?;
                let len_tok = self.next()?;
                let len = len_tok
                    .parse::<i32>()
                    .map_err(|_| ForthError::ExpectedNumber(len_tok.to_string()))?;
                self.declare_var(&name)?;
                self.data.push(DataDecl::Array { name, len: len.max(0) as usize });
            }
            "str" => {
                self.pos += 1;
                let name = self.next_name()?;
                let marker = self.next()?;
                if marker != STRING_PLACEHOLDER {
                    return Err(ForthError::ExpectedName(marker.to_string()));
                }
                let text = self.strings.pop_front().ok_or(ForthError::UnexpectedEnd)?;
                self.declare_var(&name)?;
                self.data.push(DataDecl::Bytes {
                    name,
                    bytes: text.bytes().collect(),
                });
            }
            ":" => {
                self.pos += 1;
                if self.current_proc.is_some() {
                    return Err(ForthError::NestedProcedure);
                }
                let name = self.next_name()?;
                if self.procs.contains(&name) || self.vars.contains(&name) {
                    return Err(ForthError::RedeclaredName(name));
                }
                self.procs.insert(name.clone());
                self.proc_order.push(name.clone());
                self.proc_bodies.insert(name.clone(), Vec::new());
                self.pending_label = Some(name.clone());
                self.current_proc = Some(name);
            }
            ";" => {
                self.pos += 1;
                let name = self
                    .current_proc
                    .clone()
                    .ok_or_else(|| ForthError::ExpectedName(";".to_string()))?;
                let terminator = if name == "interrupt_handler" { "iret" } else { "ret" };
                self.emit(RawInstruction::new(terminator));
                self.current_proc = None;
            }
            "=" | "!=" | "<" | ">" => {
                self.pos += 1;
                if self.pending_cmp.is_some() {
                    return Err(ForthError::ComparisonWithoutIf);
                }
                self.pending_cmp = Some(match word {
                    "=" => CmpOp::Eq,
                    "!=" => CmpOp::Ne,
                    "<" => CmpOp::Lt,
                    _ => CmpOp::Gt,
                });
            }
            "if" => {
                self.pos += 1;
                let op = self.pending_cmp.take().ok_or(ForthError::ComparisonWithoutIf)?;
                self.lower_if(op);
            }
            "else" => {
                self.pos += 1;
                self.lower_else()?;
            }
            "then" => {
                self.pos += 1;
                self.lower_then()?;
            }
            "begin" => {
                self.pos += 1;
                let label = self.fresh_label("begin");
                self.pending_label = Some(label.clone());
                self.frames.push(ControlFrame::Begin { loop_label: label });
            }
            "again" => {
                self.pos += 1;
                match self.frames.pop() {
                    Some(ControlFrame::Begin { loop_label }) => {
                        self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(loop_label)));
                        self.emit(RawInstruction::new("jump"));
                    }
                    other => {
                        if let Some(f) = other {
                            self.frames.push(f);
                        }
                        return Err(ForthError::AgainWithoutBegin);
                    }
                }
            }
            "exit" => {
                self.pos += 1;
                if self.current_proc.is_none() {
                    return Err(ForthError::ExitOutsideProcedure);
                }
                self.emit(RawInstruction::new("ret"));
            }
            "*2" => {
                self.pos += 1;
                self.lower_widen();
            }
            STRING_PLACEHOLDER => return Err(ForthError::UnexpectedString),
            _ => {
                self.pos += 1;
                self.lower_word(word)?;
            }
        }
        Ok(())
    }

    fn declare_var(&mut self, name: &str) -> Result<(), ForthError> {
        if self.vars.contains(name) || self.procs.contains(name) {
            return Err(ForthError::RedeclaredName(name.to_string()));
        }
        self.vars.insert(name.to_string());
        Ok(())
    }

    fn lower_word(&mut self, word: &str) -> Result<(), ForthError> {
        use stackvm::OpCode;
        use util::EnumFromStr;

        if let Ok(opcode) = OpCode::from_str(word) {
            if opcode.has_immediate() {
                let arg_tok = self.next()?;
                let n = arg_tok
                    .parse::<i32>()
                    .map_err(|_| ForthError::ExpectedNumber(arg_tok.to_string()))?;
                self.emit(RawInstruction::with_arg(word, RawArg::Number(n)));
            } else {
                self.emit(RawInstruction::new(word));
            }
            return Ok(());
        }

        if let Ok(n) = word.parse::<i32>() {
            self.emit(RawInstruction::with_arg("lit", RawArg::Number(n)));
            return Ok(());
        }

        if self.vars.contains(word) {
            self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(word.to_string())));
            return Ok(());
        }
        if self.procs.contains(word) {
            self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(word.to_string())));
            self.emit(RawInstruction::new("call"));
            return Ok(());
        }

        Err(ForthError::UndefinedWord(word.to_string()))
    }

    fn lower_if(&mut self, op: CmpOp) {
        let true_label = self.fresh_label("if_true");
        let false_label = self.fresh_label("if_false");

        if op == CmpOp::Lt {
            self.emit(RawInstruction::new("swap"));
        }
        self.emit(RawInstruction::new("sub"));

        let (jump_on, jump_true_first) = match op {
            CmpOp::Eq => ("jz", true),
            CmpOp::Ne => ("jz", false),
            CmpOp::Lt | CmpOp::Gt => ("jn", true),
        };

        if jump_true_first {
            self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(true_label.clone())));
            self.emit(RawInstruction::new("swap"));
            self.emit(RawInstruction::new(jump_on));
            self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(false_label.clone())));
            self.emit(RawInstruction::new("jump"));
        } else {
            self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(false_label.clone())));
            self.emit(RawInstruction::new("swap"));
            self.emit(RawInstruction::new(jump_on));
            self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(true_label.clone())));
            self.emit(RawInstruction::new("jump"));
        }

        self.pending_label = Some(true_label);
        self.frames.push(ControlFrame::If {
            false_label,
            end_label: None,
        });
    }

    fn lower_else(&mut self) -> Result<(), ForthError> {
        match self.frames.pop() {
            Some(ControlFrame::If {
                false_label,
                end_label: None,
            }) => {
                let end_label = self.fresh_label("if_end");
                self.emit(RawInstruction::with_arg("lit", RawArg::Symbol(end_label.clone())));
                self.emit(RawInstruction::new("jump"));
                self.pending_label = Some(false_label.clone());
                self.frames.push(ControlFrame::If {
                    false_label,
                    end_label: Some(end_label),
                });
                Ok(())
            }
            other => {
                if let Some(f) = other {
                    self.frames.push(f);
                }
                Err(ForthError::ElseWithoutIf)
            }
        }
    }

    fn lower_then(&mut self) -> Result<(), ForthError> {
        match self.frames.pop() {
            Some(ControlFrame::If { false_label, end_label }) => {
                self.pending_label = Some(end_label.unwrap_or(false_label));
                Ok(())
            }
            other => {
                if let Some(f) = other {
                    self.frames.push(f);
                }
                Err(ForthError::ThenWithoutIf)
            }
        }
    }

    fn lower_widen(&mut self) {
        if !self.widen_declared {
            self.data.push(DataDecl::Var { name: TMP_WIDEN_A.to_string(), initial: 0 });
            self.data.push(DataDecl::Var { name: TMP_WIDEN_B.to_string(), initial: 0 });
            self.data.push(DataDecl::Var { name: TMP_WIDEN_LOW.to_string(), initial: 0 });
            self.widen_declared = true;
        }
        let lit = |name: &str| RawInstruction::with_arg("lit", RawArg::Symbol(name.to_string()));

        self.emit(lit(TMP_WIDEN_B));
        self.emit(RawInstruction::new("store"));
        self.emit(lit(TMP_WIDEN_A));
        self.emit(RawInstruction::new("store"));

        self.emit(lit(TMP_WIDEN_A));
        self.emit(RawInstruction::new("load"));
        self.emit(lit(TMP_WIDEN_B));
        self.emit(RawInstruction::new("load"));
        self.emit(RawInstruction::new("mul"));

        self.emit(lit(TMP_WIDEN_LOW));
        self.emit(RawInstruction::new("store"));

        self.emit(lit(TMP_WIDEN_A));
        self.emit(RawInstruction::new("load"));
        self.emit(lit(TMP_WIDEN_B));
        self.emit(RawInstruction::new("load"));
        self.emit(RawInstruction::new("mulh"));

        self.emit(lit(TMP_WIDEN_LOW));
        self.emit(RawInstruction::new("load"));
        self.emit(RawInstruction::new("swap"));
    }
}

fn is_name(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Lowers a tokenized Forth-like program into the assembler's raw AST.
pub fn lower(tokens: &Tokens) -> Result<RawProgram, ForthError> {
    Lowerer::new(tokens).run()
}
