//! Two-pass parser: the first pass assigns addresses (every instruction is
//! four bytes) and collects label definitions, the second builds the
//! instruction words.

use std::collections::HashMap;

use kestrel_isa::{gp_register_index, gpr, protected_register_index, Inst, Opcode};

use crate::lexer::{self, Token, TokenKind};
use crate::AsmError;

/// Mnemonic table: opcode plus operand count.
fn mnemonic(name: &str) -> Option<(Opcode, usize)> {
    use Opcode::*;
    Some(match name {
        "MOV" => (Mov, 2),
        "GEF" => (Gef, 1),
        "LB" => (Lb, 2),
        "LBU" => (Lbu, 2),
        "LH" => (Lh, 2),
        "LHU" => (Lhu, 2),
        "LW" => (Lw, 2),
        "LWU" => (Lwu, 2),
        "LD" => (Ld, 2),
        "SB" => (Sb, 2),
        "SH" => (Sh, 2),
        "SW" => (Sw, 2),
        "SD" => (Sd, 2),
        "PUSH" => (Push, 1),
        "POP" => (Pop, 1),
        "JMP" => (Jmp, 1),
        "JLT" => (Jlt, 1),
        "JGT" => (Jgt, 1),
        "JZR" => (Jzr, 1),
        "JIF" => (Jif, 2),
        "AND" => (And, 2),
        "OR" => (Or, 2),
        "XOR" => (Xor, 2),
        "SHL" => (Shl, 2),
        "SHR" => (Shr, 2),
        "ADD" => (Add, 2),
        "SUB" => (Sub, 2),
        "MUL" => (Mul, 2),
        "SMUL" => (Smul, 2),
        "DIV" => (Div, 2),
        "SDIV" => (Sdiv, 2),
        "SSHR" => (Sshr, 2),
        "INT" => (Int, 1),
        "PMOV" => (Pmov, 2),
        "IRET" => (Iret, 0),
        _ => return None,
    })
}

/// A parsed operand: an optional register base plus a displacement.
#[derive(Debug, Clone, Copy)]
struct Operand {
    reg: Option<usize>,
    disp: i64,
}

/// Parse a whole source file into instructions.
pub fn parse(source: &str) -> Result<Vec<Inst>, AsmError> {
    let lines = lexer::tokenize(source)?;

    // Pass 1: addresses and labels.
    let mut labels: HashMap<String, u32> = HashMap::new();
    let mut stmts: Vec<(usize, &[Token])> = Vec::new();
    let mut addr = 0u32;

    for (i, line) in lines.iter().enumerate() {
        let line_no = i + 1;
        let mut toks: &[Token] = line;

        if let Some(p) = toks.iter().position(|t| t.kind == TokenKind::Pound) {
            toks = &toks[..p];
        }

        while toks.len() >= 2
            && toks[0].kind == TokenKind::Identifier
            && toks[1].kind == TokenKind::Colon
        {
            let name = toks[0].text.clone();
            if labels.insert(name.clone(), addr).is_some() {
                return Err(AsmError::DuplicateLabel {
                    line: line_no,
                    name,
                });
            }
            toks = &toks[2..];
        }

        if toks.is_empty() {
            continue;
        }
        stmts.push((line_no, toks));
        addr = addr.wrapping_add(4);
    }

    // Pass 2: build instructions.
    let mut insts = Vec::with_capacity(stmts.len());
    for (line_no, toks) in stmts {
        insts.push(parse_stmt(line_no, toks, &labels)?);
    }
    Ok(insts)
}

fn parse_stmt(
    line: usize,
    toks: &[Token],
    labels: &HashMap<String, u32>,
) -> Result<Inst, AsmError> {
    let head = &toks[0];
    if head.kind != TokenKind::Identifier {
        return Err(AsmError::MalformedOperand { line });
    }
    let Some((opcode, arity)) = mnemonic(&head.text) else {
        return Err(AsmError::UnknownMnemonic {
            line,
            name: head.text.clone(),
        });
    };

    let groups = split_operands(&toks[1..]);
    let found = groups.iter().filter(|g| !g.is_empty()).count();
    if groups.len() != arity || found != arity {
        return Err(AsmError::WrongOperandCount {
            line,
            mnemonic: opcode.mnemonic(),
            expected: arity,
            found,
        });
    }

    build_inst(line, opcode, &groups, labels)
}

/// Split an operand token stream on commas.
fn split_operands(toks: &[Token]) -> Vec<&[Token]> {
    if toks.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut start = 0;
    for (i, t) in toks.iter().enumerate() {
        if t.kind == TokenKind::Comma {
            groups.push(&toks[start..i]);
            start = i + 1;
        }
    }
    groups.push(&toks[start..]);
    groups
}

fn build_inst(
    line: usize,
    opcode: Opcode,
    groups: &[&[Token]],
    labels: &HashMap<String, u32>,
) -> Result<Inst, AsmError> {
    use Opcode::*;

    match opcode {
        Iret => Ok(Inst::new(opcode, 0, 0, 0)),

        // Destination register only.
        Pop | Gef => {
            let r0 = plain_register(line, groups[0])?;
            Ok(Inst::new(opcode, r0 as u8, 0, 0))
        }

        // Source/target operand only, in r1 + offset.
        Push | Jmp | Jlt | Jgt | Jzr | Int => {
            let src = operand(line, groups[0], labels, false)?;
            let (r1, offset) = source_fields(line, src)?;
            Ok(Inst::new(opcode, 0, r1, offset))
        }

        // Protected destination register, then a source operand.
        Pmov => {
            let r0 = protected_operand(line, groups[0])?;
            let src = operand(line, groups[1], labels, false)?;
            let (r1, offset) = source_fields(line, src)?;
            Ok(Inst::new(opcode, r0 as u8, r1, offset))
        }

        // Everything else: destination register, then a source operand.
        _ => {
            let r0 = plain_register(line, groups[0])?;
            let src = operand(line, groups[1], labels, false)?;
            let (r1, offset) = source_fields(line, src)?;
            Ok(Inst::new(opcode, r0 as u8, r1, offset))
        }
    }
}

fn source_fields(line: usize, op: Operand) -> Result<(u8, i16), AsmError> {
    let r1 = op.reg.unwrap_or(gpr::Z) as u8;
    let offset = i16::try_from(op.disp).map_err(|_| AsmError::OffsetOutOfRange {
        line,
        value: op.disp,
    })?;
    Ok((r1, offset))
}

/// An operand that must be exactly one GP register.
fn plain_register(line: usize, toks: &[Token]) -> Result<usize, AsmError> {
    match toks {
        [t] if t.kind == TokenKind::Identifier => {
            gp_register_index(&t.text).ok_or_else(|| AsmError::ExpectedRegister {
                line,
                found: t.text.clone(),
            })
        }
        [t, ..] => Err(AsmError::ExpectedRegister {
            line,
            found: t.text.clone(),
        }),
        [] => Err(AsmError::MalformedOperand { line }),
    }
}

/// An operand that must be exactly one protected register name.
fn protected_operand(line: usize, toks: &[Token]) -> Result<usize, AsmError> {
    match toks {
        [t] if t.kind == TokenKind::Identifier => {
            protected_register_index(&t.text).ok_or_else(|| AsmError::ExpectedRegister {
                line,
                found: t.text.clone(),
            })
        }
        [t, ..] => Err(AsmError::ExpectedRegister {
            line,
            found: t.text.clone(),
        }),
        [] => Err(AsmError::MalformedOperand { line }),
    }
}

/// General operand: `reg`, `reg + term`, `reg - int`, `(…)`, `term`,
/// or `-int`, where a term is an integer literal or a label.
fn operand(
    line: usize,
    mut toks: &[Token],
    labels: &HashMap<String, u32>,
    in_parens: bool,
) -> Result<Operand, AsmError> {
    // Strip one matching pair of parentheses.
    if !in_parens
        && toks.len() >= 2
        && toks.first().is_some_and(|t| t.kind == TokenKind::OpenParen)
        && toks.last().is_some_and(|t| t.kind == TokenKind::CloseParen)
    {
        return operand(line, &toks[1..toks.len() - 1], labels, true);
    }

    let malformed = || AsmError::MalformedOperand { line };

    let first = toks.first().ok_or_else(malformed)?;

    // Register base?
    let reg = if first.kind == TokenKind::Identifier {
        gp_register_index(&first.text)
    } else {
        None
    };

    if let Some(reg) = reg {
        toks = &toks[1..];
        if toks.is_empty() {
            return Ok(Operand {
                reg: Some(reg),
                disp: 0,
            });
        }
        let sign = match toks[0].kind {
            TokenKind::Plus => 1i64,
            TokenKind::Minus => -1,
            _ => return Err(malformed()),
        };
        let disp = sign * term(line, &toks[1..], labels)?;
        return Ok(Operand {
            reg: Some(reg),
            disp,
        });
    }

    // Bare term, possibly negated.
    let (sign, rest) = if first.kind == TokenKind::Minus {
        (-1i64, &toks[1..])
    } else {
        (1, toks)
    };
    let disp = sign * term(line, rest, labels)?;
    Ok(Operand { reg: None, disp })
}

/// A single displacement term: an integer literal or a label reference.
fn term(line: usize, toks: &[Token], labels: &HashMap<String, u32>) -> Result<i64, AsmError> {
    match toks {
        [t] if t.kind == TokenKind::IntLiteral => {
            i64::try_from(t.value).map_err(|_| AsmError::OffsetOutOfRange {
                line,
                value: i64::MAX,
            })
        }
        [t] if t.kind == TokenKind::Identifier => labels
            .get(&t.text)
            .map(|&a| a as i64)
            .ok_or_else(|| AsmError::UnknownLabel {
                line,
                name: t.text.clone(),
            }),
        _ => Err(AsmError::MalformedOperand { line }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_isa::gpr;
    use pretty_assertions::assert_eq;

    fn one(source: &str) -> Inst {
        let insts = parse(source).unwrap();
        assert_eq!(insts.len(), 1, "expected a single instruction");
        insts[0]
    }

    #[test]
    fn mov_immediate_matches_the_reference_encoding() {
        assert_eq!(one("MOV A, Z+42").encode(), 0x000F_002A);
    }

    #[test]
    fn memory_operands_may_be_parenthesised() {
        let plain = one("LD B, Z+0x100");
        let parens = one("LD B, (Z+0x100)");
        assert_eq!(plain, parens);
        assert_eq!(parens.r0 as usize, gpr::B);
        assert_eq!(parens.r1 as usize, gpr::Z);
        assert_eq!(parens.offset, 0x100);
    }

    #[test]
    fn bare_immediates_encode_against_the_zero_register() {
        let inst = one("JMP 0x20");
        assert_eq!(inst.r1 as usize, gpr::Z);
        assert_eq!(inst.offset, 0x20);
    }

    #[test]
    fn negative_offsets() {
        assert_eq!(one("MOV A, Z-1").offset, -1);
        assert_eq!(one("PUSH A-8").offset, -8);
        assert_eq!(one("MOV A, -4").offset, -4);
    }

    #[test]
    fn labels_resolve_across_the_file() {
        let insts = parse(
            "start: MOV A, Z+1\n\
             JMP loop\n\
             loop: SUB A, Z+1\n\
             JIF A, loop\n\
             JMP start",
        )
        .unwrap();
        assert_eq!(insts[1].offset, 8); // loop
        assert_eq!(insts[3].r0 as usize, gpr::A);
        assert_eq!(insts[3].offset, 8);
        assert_eq!(insts[4].offset, 0); // start
    }

    #[test]
    fn label_only_lines_and_comments_take_no_space() {
        let insts = parse(
            "# program header\n\
             entry:\n\
             \n\
             MOV A, Z+1 # set up\n\
             JMP entry",
        )
        .unwrap();
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[1].offset, 0);
    }

    #[test]
    fn pmov_takes_a_protected_register_name() {
        let inst = one("PMOV IJT, Z+0x200");
        assert_eq!(inst.r0 as usize, kestrel_isa::preg::IJT);
        assert_eq!(inst.offset, 0x200);
    }

    #[test]
    fn iret_takes_no_operands() {
        assert_eq!(one("IRET").encode(), 0x2200_0000);
    }

    #[test]
    fn push_source_goes_into_r1() {
        let inst = one("PUSH X+2");
        assert_eq!(inst.r0, 0);
        assert_eq!(inst.r1 as usize, gpr::X);
        assert_eq!(inst.offset, 2);
    }

    #[test]
    fn pop_destination_goes_into_r0() {
        let inst = one("POP Y");
        assert_eq!(inst.r0 as usize, gpr::Y);
        assert_eq!(inst.r1, 0);
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        assert_eq!(
            parse("FROB A, B").unwrap_err(),
            AsmError::UnknownMnemonic {
                line: 1,
                name: "FROB".into()
            }
        );
    }

    #[test]
    fn wrong_operand_count_is_an_error() {
        assert_eq!(
            parse("MOV A").unwrap_err(),
            AsmError::WrongOperandCount {
                line: 1,
                mnemonic: "MOV",
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let err = parse("x: MOV A, Z+1\nx: MOV B, Z+2").unwrap_err();
        assert_eq!(
            err,
            AsmError::DuplicateLabel {
                line: 2,
                name: "x".into()
            }
        );
    }

    #[test]
    fn unknown_label_is_an_error() {
        assert_eq!(
            parse("JMP nowhere").unwrap_err(),
            AsmError::UnknownLabel {
                line: 1,
                name: "nowhere".into()
            }
        );
    }

    #[test]
    fn oversized_offsets_are_rejected() {
        assert_eq!(
            parse("MOV A, Z+0x8000").unwrap_err(),
            AsmError::OffsetOutOfRange {
                line: 1,
                value: 0x8000
            }
        );
        assert!(parse("MOV A, Z-0x8000").is_ok());
        assert!(parse("MOV A, Z+0x7FFF").is_ok());
    }

    #[test]
    fn destination_must_be_a_plain_register() {
        assert_eq!(
            parse("MOV 5, A").unwrap_err(),
            AsmError::ExpectedRegister {
                line: 1,
                found: "5".into()
            }
        );
    }
}
