//! Line parser for textual 6502 disassembly listings.
//!
//! Accepts the output of the usual C64 disassemblers and monitors:
//!
//! ```text
//! start:  $C000: LDX #$00      ; optional label, address and comment
//!         $C002  E8        INX
//! .C003  E0 0A     CPX #$0A      (VICE monitor, byte columns are skipped)
//!         BNE start             (address inferred from the previous line)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while, take_while1, take_while_m_n};
use nom::character::complete::{alpha1, char, digit1, hex_digit1, one_of, space0, space1};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, rest, value, verify};
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

use crate::{Address, Index, Instruction, Mnemonic, Operand, IO_START, ZERO_PAGE_END};

/// Why a line of the listing was skipped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseLineError {
    /// Not of the form `[label:] [address] MNEMONIC [operand]`
    #[error("unrecognized instruction syntax")]
    Syntax,

    /// Operand text matches no addressing mode
    #[error("operand `{0}` is not a valid addressing mode")]
    Operand(String),

    /// First instruction of the listing has no address
    #[error("no address and no previous instruction to infer it from")]
    MissingAddress,

    /// Address already taken by an earlier line
    #[error("address ${0:04X} already holds an instruction")]
    DuplicateAddress(Address),
}

/// A line that did not make it into the instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number in the listing
    pub line: usize,
    /// Original text of the line
    pub text: String,
    /// Reason for skipping
    pub error: ParseLineError,
}

/// One classified listing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Empty or comment-only
    Blank,
    /// A label on a line of its own
    Label(String),
    /// An instruction, possibly without an address
    Instruction {
        label: Option<String>,
        address: Option<Address>,
        mnemonic: Mnemonic,
        operand: Operand,
    },
}

/// Addresses the resolver should name, gathered while parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    /// JSR targets
    pub subroutines: BTreeSet<Address>,
    /// JMP and branch targets
    pub jump_labels: BTreeSet<Address>,
    /// Subroutines that call themselves
    pub recursive: BTreeSet<Address>,
    /// Data operands in $00-$FF
    pub zero_page: BTreeSet<Address>,
    /// Data operands at or above $D000
    pub hardware: BTreeSet<Address>,
    /// Remaining data operands, named only if the memory map knows them
    pub memory: BTreeSet<Address>,
    /// Labels written in the listing itself, first one per address
    pub source_labels: BTreeMap<Address, String>,
}

impl Candidates {
    /// Scan an address-ordered instruction stream
    pub fn collect(instructions: &[Instruction], source_labels: BTreeMap<Address, String>) -> Self {
        let mut candidates = Candidates { source_labels, ..Candidates::default() };

        for insn in instructions {
            if let Some(target) = insn.target() {
                if insn.mnemonic == Mnemonic::Jsr {
                    candidates.subroutines.insert(target);
                } else {
                    candidates.jump_labels.insert(target);
                }
            }

            if let Some(address) = insn.data_address() {
                if address <= ZERO_PAGE_END {
                    candidates.zero_page.insert(address);
                } else if address >= IO_START {
                    candidates.hardware.insert(address);
                } else {
                    candidates.memory.insert(address);
                }
            }
        }

        // A call is recursive when it targets the entry of the routine it sits in
        let entry = instructions.first().map(|insn| insn.address);
        for insn in instructions.iter().filter(|insn| insn.mnemonic == Mnemonic::Jsr) {
            let Some(target) = insn.target() else { continue };
            let routine = candidates
                .subroutines
                .range(..=insn.address)
                .next_back()
                .copied()
                .into_iter()
                .chain(entry.filter(|entry| *entry <= insn.address))
                .max();
            if routine == Some(target) {
                candidates.recursive.insert(target);
            }
        }

        candidates
    }
}

/// Result of parsing a whole listing.
#[derive(Debug, Clone, Default)]
pub struct ParsedListing {
    /// Address-ordered instructions
    pub instructions: Vec<Instruction>,
    /// Candidate addresses for the symbol resolver
    pub candidates: Candidates,
    /// Lines that were skipped, in listing order
    pub skipped: Vec<SkippedLine>,
}

impl ParsedListing {
    /// Returns true if nothing decompilable was found
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// Stateful listing parser: infers missing addresses, attaches labels, and
/// records what it had to skip.
#[derive(Debug, Default)]
pub struct DisassemblyParser {
    instructions: Vec<Instruction>,
    seen: BTreeSet<Address>,
    labels: BTreeMap<String, Address>,
    source_labels: BTreeMap<Address, String>,
    pending_labels: Vec<String>,
    skipped: Vec<SkippedLine>,
    next_address: Option<Address>,
}

impl DisassemblyParser {
    /// Construct an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete listing
    pub fn parse(source: &str) -> ParsedListing {
        let mut parser = Self::new();
        for (index, line) in source.lines().enumerate() {
            parser.feed_line(index + 1, line);
        }
        parser.finish()
    }

    /// Consume one line of the listing
    pub fn feed_line(&mut self, line: usize, text: &str) {
        match scan_line(text) {
            Ok(Line::Blank) => {}
            Ok(Line::Label(name)) => self.pending_labels.push(name),
            Ok(Line::Instruction { label, address, mnemonic, operand }) => {
                let Some(address) = address.or(self.next_address) else {
                    self.skip(line, text, ParseLineError::MissingAddress);
                    return;
                };
                if !self.seen.insert(address) {
                    self.skip(line, text, ParseLineError::DuplicateAddress(address));
                    return;
                }

                let insn = Instruction::new(address, mnemonic, operand);
                self.next_address = Some(insn.next_address());

                for name in self.pending_labels.drain(..).chain(label) {
                    self.source_labels.entry(address).or_insert_with(|| name.clone());
                    self.labels.entry(name).or_insert(address);
                }
                self.instructions.push(insn);
            }
            Err(error) => self.skip(line, text, error),
        }
    }

    fn skip(&mut self, line: usize, text: &str, error: ParseLineError) {
        log::warn!("Skipping line {}: `{}` ({})", line, text.trim(), error);
        self.skipped.push(SkippedLine { line, text: text.to_string(), error });
    }

    /// Finish parsing: resolve listing labels, order by address, gather candidates
    pub fn finish(self) -> ParsedListing {
        let DisassemblyParser { mut instructions, labels, source_labels, pending_labels, skipped, .. } = self;

        if !pending_labels.is_empty() {
            log::debug!("Dropping {} trailing label(s) with no instruction", pending_labels.len());
        }

        for insn in instructions.iter_mut().filter(|insn| insn.mnemonic.is_control_flow()) {
            if let Operand::Symbolic(name) = &insn.operand {
                if let Some(address) = labels.get(name) {
                    insn.operand = Operand::Absolute(*address);
                }
            }
        }

        instructions.sort_by_key(|insn| insn.address);
        let candidates = Candidates::collect(&instructions, source_labels);

        log::debug!(
            "Parsed {} instructions ({} skipped lines, {} subroutine and {} jump candidates)",
            instructions.len(),
            skipped.len(),
            candidates.subroutines.len(),
            candidates.jump_labels.len()
        );

        ParsedListing { instructions, candidates, skipped }
    }
}

/// Parse a whole listing
pub fn parse(source: &str) -> ParsedListing {
    DisassemblyParser::parse(source)
}

/// Parse a single line that carries its own address.
///
/// Returns `None` for blank lines, label-only lines, lines without an address
/// and unparseable lines.
pub fn parse_line(text: &str) -> Option<Instruction> {
    match scan_line(text) {
        Ok(Line::Instruction { address: Some(address), mnemonic, operand, .. }) => {
            Some(Instruction::new(address, mnemonic, operand))
        }
        _ => None,
    }
}

/// Classify one listing line
pub fn scan_line(text: &str) -> Result<Line, ParseLineError> {
    let code = strip_comment(text).trim();
    if code.is_empty() {
        return Ok(Line::Blank);
    }

    if let Ok((_, name)) = all_consuming(label_definition)(code) {
        return Ok(Line::Label(name.to_string()));
    }

    let (_, parts) = all_consuming(instruction_line)(code).map_err(|_| ParseLineError::Syntax)?;

    let operand = match parts.operand.map(str::trim) {
        None => Operand::None,
        Some(text) => match operand(text) {
            Ok((_, operand)) => operand,
            Err(_) => return Err(ParseLineError::Operand(text.to_string())),
        },
    };

    Ok(Line::Instruction {
        label: parts.label.map(String::from),
        address: parts.address,
        mnemonic: Mnemonic::parse(parts.mnemonic),
        operand,
    })
}

fn strip_comment(line: &str) -> &str {
    line.split(';').next().unwrap_or("")
}

struct LineParts<'a> {
    label: Option<&'a str>,
    address: Option<Address>,
    mnemonic: &'a str,
    operand: Option<&'a str>,
}

fn instruction_line(input: &str) -> IResult<&str, LineParts<'_>> {
    map(
        tuple((
            opt(terminated(label_definition, space0)),
            opt(terminated(address, space0)),
            many0(terminated(byte_column, space1)),
            mnemonic_token,
            opt(preceded(space1, rest)),
        )),
        |(label, address, _, mnemonic, operand)| LineParts { label, address, mnemonic, operand },
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Four hex digits with no prefix read as an address, never as a label
fn is_bare_address(text: &str) -> bool {
    text.len() == 4 && text.chars().all(|c| c.is_ascii_hexdigit())
}

fn label_definition(input: &str) -> IResult<&str, &str> {
    terminated(verify(identifier, |name: &str| !is_bare_address(name)), pair(space0, char(':')))(input)
}

fn bare_hex_address(input: &str) -> IResult<&str, Address> {
    map_res(take_while_m_n(4, 4, |c: char| c.is_ascii_hexdigit()), |digits: &str| {
        Address::from_str_radix(digits, 16)
    })(input)
}

fn address(input: &str) -> IResult<&str, Address> {
    alt((
        terminated(hex_literal, opt(char(':'))),
        terminated(bare_hex_address, char(':')),
        preceded(char('.'), bare_hex_address),
    ))(input)
}

fn byte_column(input: &str) -> IResult<&str, &str> {
    take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit())(input)
}

fn mnemonic_token(input: &str) -> IResult<&str, &str> {
    verify(alpha1, |token: &str| token.len() == 3)(input)
}

fn hex_literal(input: &str) -> IResult<&str, u16> {
    map_res(preceded(alt((tag("$"), tag_no_case("0x"))), hex_digit1), |digits: &str| {
        u16::from_str_radix(digits, 16)
    })(input)
}

fn binary_literal(input: &str) -> IResult<&str, u16> {
    map_res(preceded(char('%'), take_while1(|c: char| c == '0' || c == '1')), |digits: &str| {
        u16::from_str_radix(digits, 2)
    })(input)
}

fn decimal_literal(input: &str) -> IResult<&str, u16> {
    map_res(digit1, |digits: &str| digits.parse::<u16>())(input)
}

fn number(input: &str) -> IResult<&str, u16> {
    alt((hex_literal, binary_literal, decimal_literal))(input)
}

fn byte(input: &str) -> IResult<&str, u8> {
    map_res(number, |value: u16| u8::try_from(value))(input)
}

fn comma(input: &str) -> IResult<&str, char> {
    delimited(space0, char(','), space0)(input)
}

fn parenthesized<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(pair(char('('), space0), inner, pair(space0, char(')')))
}

fn index_register(input: &str) -> IResult<&str, Index> {
    alt((value(Index::X, one_of("xX")), value(Index::Y, one_of("yY"))))(input)
}

fn immediate(input: &str) -> IResult<&str, Operand> {
    map(preceded(pair(char('#'), space0), byte), Operand::Immediate)(input)
}

fn indirect_y(input: &str) -> IResult<&str, Operand> {
    map_res(pair(parenthesized(number), preceded(comma, one_of("yY"))), |(zp, _): (u16, char)| {
        u8::try_from(zp).map(|zp| Operand::IndirectIndexed { zp, index: Index::Y })
    })(input)
}

fn indirect_x(input: &str) -> IResult<&str, Operand> {
    map_res(parenthesized(terminated(number, preceded(comma, one_of("xX")))), |zp: u16| {
        u8::try_from(zp).map(|zp| Operand::IndirectIndexed { zp, index: Index::X })
    })(input)
}

fn indirect(input: &str) -> IResult<&str, Operand> {
    map(parenthesized(number), Operand::Indirect)(input)
}

fn indexed(input: &str) -> IResult<&str, Operand> {
    map(pair(number, preceded(comma, index_register)), |(base, index)| Operand::Indexed { base, index })(input)
}

fn absolute(input: &str) -> IResult<&str, Operand> {
    map(number, Operand::Absolute)(input)
}

fn accumulator(input: &str) -> IResult<&str, Operand> {
    value(Operand::Accumulator, one_of("aA"))(input)
}

fn symbolic(input: &str) -> IResult<&str, Operand> {
    map(identifier, |label: &str| Operand::Symbolic(label.to_string()))(input)
}

fn operand(input: &str) -> IResult<&str, Operand> {
    alt((
        all_consuming(immediate),
        all_consuming(indirect_y),
        all_consuming(indirect_x),
        all_consuming(indirect),
        all_consuming(indexed),
        all_consuming(absolute),
        all_consuming(accumulator),
        all_consuming(symbolic),
    ))(input)
}
