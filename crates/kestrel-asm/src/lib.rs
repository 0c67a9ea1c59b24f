//! Assembler for the Kestrel register machine.
//!
//! Line-oriented syntax: an optional `label:` definition, then a mnemonic
//! and its comma-separated operands. `#` starts a comment that runs to the
//! end of the line. Operands are a register, `reg + imm`, `reg - imm`, a
//! parenthesised memory form `(reg + imm)`, or a bare immediate or label
//! (encoded against the zero register). Integer literals accept the C
//! bases: `0x…` hex, a leading `0` octal, decimal otherwise.
//!
//! Every instruction assembles to one 32-bit word, stored little-endian.

#![forbid(unsafe_code)]

mod lexer;
mod parser;

pub use lexer::{Token, TokenKind};
pub use parser::parse;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("line {line}, column {col}: illegal character {ch:?}")]
    IllegalCharacter { line: usize, col: usize, ch: char },
    #[error("line {line}, column {col}: integer literal too large")]
    LiteralTooLarge { line: usize, col: usize },
    #[error("line {line}, column {col}: identifier directly followed by a digit")]
    IdentifierDigit { line: usize, col: usize },
    #[error("line {line}: unknown mnemonic {name:?}")]
    UnknownMnemonic { line: usize, name: String },
    #[error("line {line}: {mnemonic} expects {expected} operand(s), found {found}")]
    WrongOperandCount {
        line: usize,
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: expected a register, found {found:?}")]
    ExpectedRegister { line: usize, found: String },
    #[error("line {line}: unknown label {name:?}")]
    UnknownLabel { line: usize, name: String },
    #[error("line {line}: duplicate label {name:?}")]
    DuplicateLabel { line: usize, name: String },
    #[error("line {line}: offset {value} does not fit in a signed 16-bit field")]
    OffsetOutOfRange { line: usize, value: i64 },
    #[error("line {line}: malformed operand")]
    MalformedOperand { line: usize },
    #[error("program ({program} bytes) exceeds the image size ({size} bytes)")]
    ProgramTooLarge { program: usize, size: usize },
}

/// Assemble `source` into its program bytes.
pub fn assemble(source: &str) -> Result<Vec<u8>, AsmError> {
    let insts = parser::parse(source)?;
    let mut out = Vec::with_capacity(insts.len() * 4);
    for inst in insts {
        out.extend_from_slice(&inst.encode().to_le_bytes());
    }
    Ok(out)
}

/// Assemble `source` into a zero-padded image of exactly `size` bytes.
pub fn assemble_image(source: &str, size: usize) -> Result<Vec<u8>, AsmError> {
    let mut program = assemble(source)?;
    if program.len() > size {
        return Err(AsmError::ProgramTooLarge {
            program: program.len(),
            size,
        });
    }
    program.resize(size, 0);
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn assemble_emits_little_endian_words() {
        let bytes = assemble("MOV A, Z+42").unwrap();
        assert_eq!(bytes, 0x000F_002Au32.to_le_bytes());
    }

    #[test]
    fn image_is_zero_padded() {
        let image = assemble_image("MOV A, Z+1", 16).unwrap();
        assert_eq!(image.len(), 16);
        assert_eq!(&image[4..], &[0u8; 12]);
    }

    #[test]
    fn oversized_program_is_rejected() {
        let err = assemble_image("MOV A, Z+1\nMOV B, Z+2", 4).unwrap_err();
        assert_eq!(
            err,
            AsmError::ProgramTooLarge {
                program: 8,
                size: 4
            }
        );
    }
}
