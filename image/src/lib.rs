//! Reads and writes the on-disk executable image: a code file (a 4-byte big-endian interrupt
//! vector — the handler's instruction index, or [`stackvm::constants::NO_HANDLER`] if the
//! program never uses `eint` — followed by one 32-bit big-endian word per instruction) and a
//! data file (a flat sequence of 32-bit big-endian signed words). Grounded in `vexfile`'s
//! byteorder-based reader/writer traits, reworked from its single length-prefixed file into
//! this simpler two-file layout.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ReadBytesExt, WriteBytesExt};
use stackvm::{constants, decode_instruction, encode_instruction, CodecError, Instruction};
use util::Endian;

#[derive(Debug)]
pub enum ImageError {
    Io(std::io::Error),
    Codec(CodecError),
}

impl std::fmt::Display for ImageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageError::Io(e) => write!(f, "{}", e),
            ImageError::Codec(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ImageError {}

impl From<std::io::Error> for ImageError {
    fn from(e: std::io::Error) -> ImageError {
        ImageError::Io(e)
    }
}

impl From<CodecError> for ImageError {
    fn from(e: CodecError) -> ImageError {
        ImageError::Codec(e)
    }
}

/// A fully resolved program ready to load into a [`stackvm::DataPath`]/[`stackvm::ControlUnit`].
pub struct Image {
    pub code: Vec<Instruction>,
    pub data: Vec<i32>,
    pub handler_address: Option<usize>,
}

pub fn read_code<R: Read>(reader: &mut R) -> Result<(Vec<Instruction>, Option<usize>), ImageError> {
    let vector = reader.read_u32::<Endian>()?;
    let handler_address = if vector == constants::NO_HANDLER {
        None
    } else {
        Some(vector as usize)
    };

    let mut code = Vec::new();
    loop {
        match reader.read_u32::<Endian>() {
            Ok(word) => code.push(decode_instruction(word)?),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ImageError::Io(e)),
        }
    }
    Ok((code, handler_address))
}

pub fn write_code<W: Write>(
    writer: &mut W,
    code: &[Instruction],
    handler_address: Option<usize>,
) -> Result<(), ImageError> {
    let vector = handler_address.map(|a| a as u32).unwrap_or(constants::NO_HANDLER);
    writer.write_u32::<Endian>(vector)?;
    for instr in code {
        writer.write_u32::<Endian>(encode_instruction(instr)?)?;
    }
    Ok(())
}

pub fn read_data<R: Read>(reader: &mut R) -> Result<Vec<i32>, ImageError> {
    let mut data = Vec::new();
    loop {
        match reader.read_i32::<Endian>() {
            Ok(word) => data.push(word),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ImageError::Io(e)),
        }
    }
    Ok(data)
}

pub fn write_data<W: Write>(writer: &mut W, data: &[i32]) -> Result<(), ImageError> {
    for &word in data {
        writer.write_i32::<Endian>(word)?;
    }
    Ok(())
}

pub fn read_image<P: AsRef<Path>>(code_path: P, data_path: P) -> Result<Image, ImageError> {
    let (code, handler_address) = read_code(&mut BufReader::new(File::open(code_path)?))?;
    let data = read_data(&mut BufReader::new(File::open(data_path)?))?;
    Ok(Image { code, data, handler_address })
}

pub fn write_image<P: AsRef<Path>>(code_path: P, data_path: P, image: &Image) -> Result<(), ImageError> {
    write_code(
        &mut BufWriter::new(File::create(code_path)?),
        &image.code,
        image.handler_address,
    )?;
    write_data(&mut BufWriter::new(File::create(data_path)?), &image.data)?;
    Ok(())
}

/// Renders a code image as `<addr> - <8-hex-digits> - <mnemonic> [arg]` lines, one per
/// instruction; the interrupt vector is not included.
pub fn code_hex_dump(code: &[Instruction]) -> Result<String, ImageError> {
    let mut out = String::new();
    for (addr, instr) in code.iter().enumerate() {
        let word = encode_instruction(instr)?;
        if instr.opcode.has_immediate() {
            let _ = writeln!(out, "{} - {:08X} - {} {}", addr, word, instr.opcode.mnemonic(), instr.arg);
        } else {
            let _ = writeln!(out, "{} - {:08X} - {}", addr, word, instr.opcode.mnemonic());
        }
    }
    Ok(out)
}

/// Renders a data image as `<addr> - <8-hex-digits>` lines, one per word.
pub fn data_hex_dump(data: &[i32]) -> String {
    let mut out = String::new();
    for (addr, &word) in data.iter().enumerate() {
        let _ = writeln!(out, "{} - {:08X}", addr, word as u32);
    }
    out
}
