//! Drives a Forth-like source file through tokenizing, lowering, assembling and running it on
//! the stack machine, printing whatever the program wrote to output port 1. Styled after
//! `vex`'s CLI: one positional program argument plus a handful of `--flag VALUE` options.

#[macro_use]
extern crate clap;

use std::fs;
use std::io::Write;

use clap::Arg;
use stackvm::{constants, ControlUnit, DataMemory, DataPath, ExitCode, IoController, Schedule};

#[derive(Debug)]
enum Error {
    Io(std::io::Error, String),
    Lex(lexer::LexError),
    Forth(forth::ForthError),
    Asm(asm::AsmError),
    Image(image::ImageError),
    Runtime(stackvm::RuntimeError),
    Clap(clap::Error),
    Schedule(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e, path) => write!(f, "{}: {}", path, e),
            Error::Lex(e) => write!(f, "lex error: {}", e),
            Error::Forth(e) => write!(f, "forth error: {}", e),
            Error::Asm(e) => write!(f, "assembler error: {}", e),
            Error::Image(e) => write!(f, "image error: {}", e),
            Error::Runtime(e) => write!(f, "runtime error: {}", e),
            Error::Clap(e) => write!(f, "{}", e),
            Error::Schedule(line) => write!(f, "malformed input schedule line: \"{}\"", line),
        }
    }
}

/// Parses `<tick> <port> <byte>` lines into a [`Schedule`]; `byte` is a literal character, or
/// the two-character escape `\0` for a NUL byte.
fn parse_schedule(text: &str) -> Result<Schedule, Error> {
    let mut schedule = Schedule::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(3, char::is_whitespace);
        let tick = fields.next().and_then(|s| s.parse::<u64>().ok());
        let port = fields.next().and_then(|s| s.trim().parse::<i32>().ok());
        let rest = fields.next().map(str::trim);
        let byte = match rest {
            Some("\\0") => Some(0u8),
            Some(s) if s.chars().count() == 1 => s.chars().next().map(|c| c as u8),
            _ => None,
        };
        match (tick, port, byte) {
            (Some(tick), Some(port), Some(byte)) => {
                schedule.insert(tick, (port, byte));
            }
            _ => return Err(Error::Schedule(line.to_string())),
        }
    }
    Ok(schedule)
}

fn run() -> Result<ExitCode, Error> {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("PROGRAM")
                .help("Forth-like source file to run")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("input")
                .short("i")
                .long("input")
                .takes_value(true)
                .value_name("SCHEDULE")
                .help("Input schedule file (lines of \"tick port byte\")"),
        )
        .arg(
            Arg::with_name("ticks")
                .short("t")
                .long("ticks")
                .takes_value(true)
                .value_name("TICKS")
                .default_value("1000000")
                .help("Tick limit before the run is reported as stalled"),
        )
        .arg(
            Arg::with_name("stack")
                .long("stack")
                .takes_value(true)
                .value_name("SIZE")
                .default_value("64")
                .help("Operand stack capacity"),
        )
        .arg(
            Arg::with_name("call-stack")
                .long("call-stack")
                .takes_value(true)
                .value_name("SIZE")
                .default_value("32")
                .help("Call stack capacity"),
        )
        .arg(
            Arg::with_name("emit-image")
                .long("emit-image")
                .takes_value(true)
                .value_name("PREFIX")
                .help("Write PREFIX.code.bin and PREFIX.data.bin instead of running"),
        )
        .get_matches();

    let path = matches.value_of("PROGRAM").unwrap();
    let source = fs::read_to_string(path).map_err(|e| Error::Io(e, path.to_string()))?;

    let tokens = lexer::tokenize(&source).map_err(Error::Lex)?;
    let raw = forth::lower(&tokens).map_err(Error::Forth)?;
    let assembled = asm::assemble(&raw).map_err(Error::Asm)?;

    if let Some(prefix) = matches.value_of("emit-image") {
        let image = image::Image {
            code: assembled.code.clone(),
            data: assembled.data.clone(),
            handler_address: assembled.handler_address,
        };
        image::write_image(format!("{}.code.bin", prefix), format!("{}.data.bin", prefix), &image)
            .map_err(Error::Image)?;
        fs::write(
            format!("{}.code.bin.hex", prefix),
            image::code_hex_dump(&assembled.code).map_err(Error::Image)?,
        )
        .map_err(|e| Error::Io(e, format!("{}.code.bin.hex", prefix)))?;
        fs::write(format!("{}.data.bin.hex", prefix), image::data_hex_dump(&assembled.data))
            .map_err(|e| Error::Io(e, format!("{}.data.bin.hex", prefix)))?;
    }

    let schedule = match matches.value_of("input") {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| Error::Io(e, path.to_string()))?;
            parse_schedule(&text)?
        }
        None => Schedule::new(),
    };

    let tick_limit = value_t!(matches, "ticks", u64).map_err(Error::Clap)?;
    let stack_capacity = value_t!(matches, "stack", usize).map_err(Error::Clap)?;
    let call_stack_capacity = value_t!(matches, "call-stack", usize).map_err(Error::Clap)?;

    let data_path = DataPath::new(stack_capacity, DataMemory::new(assembled.data), IoController::new());
    let mut cu = ControlUnit::new(
        assembled.code,
        data_path,
        call_stack_capacity,
        assembled.handler_address,
        schedule,
        tick_limit,
    );

    let exit_code = cu.run().map_err(Error::Runtime)?;
    std::io::stdout()
        .write_all(&cu.data_path.io.drained_output(constants::OUT_PORT_MIN))
        .map_err(|e| Error::Io(e, "<stdout>".to_string()))?;
    Ok(exit_code)
}

fn main() {
    match run() {
        Ok(code) => {
            eprintln!("exit: {:?}", code);
            if code == ExitCode::TickLimitReached {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    }
}
