// Loaders for uCIR programs.
//
// Two source formats produce the same instruction list: a line
// oriented text format (one instruction per line, the way IR dumps
// read) and a JSON array-of-arrays, which is the direct serialization
// of the tuples the compiler produces. `load` sniffs the format.

use std::fs;

use regex::Regex;

use crate::ir::{decode, Instruction, Op, Operand, TypeTag};


#[derive(Clone, Debug, PartialEq)]
pub enum ParseError {
    ReadError(String),
    SyntaxError(usize, String),
    JsonError(String),
}

pub type ParseResult = Result<Vec<Instruction>, ParseError>;


pub fn load(path: &str) -> ParseResult {
    let source = fs::read_to_string(path)
        .map_err(|e| ParseError::ReadError(format!("{}: {}", path, e)))?;
    parse(&source)
}

pub fn parse(source: &str) -> ParseResult {
    if source.trim_start().starts_with('[') {
        parse_json(source)
    } else {
        parse_text(source)
    }
}


// ------------------------------------------------------------------
// Text format

lazy_static! {
    static ref LABEL_REGEX: Regex = Regex::new(r"^[\w.$]+:$").unwrap();
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(line: &str, lineno: usize) -> Result<Vec<Tok>, ParseError> {
    let mut toks = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ';' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                toks.push(Tok::LParen);
            }
            ')' => {
                chars.next();
                toks.push(Tok::RParen);
            }
            '[' => {
                chars.next();
                toks.push(Tok::LBracket);
            }
            ']' => {
                chars.next();
                toks.push(Tok::RBracket);
            }
            ',' => {
                chars.next();
                toks.push(Tok::Comma);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(ParseError::SyntaxError(
                                lineno,
                                String::from("unterminated quote"),
                            ))
                        }
                        Some(c) if c == quote => break,
                        Some('\\') => text.push(unescape(chars.next(), lineno)?),
                        Some(c) => text.push(c),
                    }
                }
                toks.push(Tok::Quoted(text));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "()[],;".contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                toks.push(Tok::Word(word));
            }
        }
    }

    Ok(toks)
}

fn unescape(c: Option<char>, lineno: usize) -> Result<char, ParseError> {
    match c {
        Some('n') => Ok('\n'),
        Some('t') => Ok('\t'),
        Some('0') => Ok('\0'),
        Some('\\') => Ok('\\'),
        Some('\'') => Ok('\''),
        Some('"') => Ok('"'),
        _ => Err(ParseError::SyntaxError(
            lineno,
            String::from("bad escape sequence"),
        )),
    }
}

// Names are lexically distinct from literals: @ and % prefix globals
// and registers, digits open numbers, and any other bare word is a
// label reference.
fn classify_word(word: &str) -> Operand {
    if word.starts_with('@') || word.starts_with('%') {
        Operand::Name(word.to_string())
    } else if let Ok(v) = word.parse::<i64>() {
        Operand::Int(v)
    } else if let Ok(v) = word.parse::<f64>() {
        Operand::Float(v)
    } else {
        Operand::Name(word.to_string())
    }
}

fn parse_line(line: &str, lineno: usize) -> Result<Option<Instruction>, ParseError> {
    let toks = tokenize(line, lineno)?;
    if toks.is_empty() {
        return Ok(None);
    }

    let op = match &toks[0] {
        Tok::Word(w) => w.clone(),
        _ => {
            return Err(ParseError::SyntaxError(
                lineno,
                String::from("expected an opcode"),
            ))
        }
    };

    if toks.len() == 1 && LABEL_REGEX.is_match(&op) {
        return Ok(Some(Instruction::new(&op, vec![])));
    }

    let mut args = Vec::new();
    let mut i = 1;
    while i < toks.len() {
        let (operand, next) = parse_operand(&toks, i, lineno)?;
        args.push(operand);
        i = next;
    }

    let mut instr = Instruction::new(&op, args);
    fixup(&mut instr);
    Ok(Some(instr))
}

fn parse_operand(
    toks: &[Tok],
    at: usize,
    lineno: usize,
) -> Result<(Operand, usize), ParseError> {
    match &toks[at] {
        Tok::Word(w) => Ok((classify_word(w), at + 1)),
        Tok::Quoted(s) => Ok((Operand::Str(s.clone()), at + 1)),
        Tok::LBracket => parse_list(toks, at + 1, lineno),
        Tok::LParen => parse_params(toks, at + 1, lineno),
        tok => Err(ParseError::SyntaxError(
            lineno,
            format!("unexpected token {:?}", tok),
        )),
    }
}

fn parse_list(
    toks: &[Tok],
    mut at: usize,
    lineno: usize,
) -> Result<(Operand, usize), ParseError> {
    let mut items = Vec::new();
    loop {
        match toks.get(at) {
            Some(Tok::RBracket) => return Ok((Operand::List(items), at + 1)),
            Some(Tok::Comma) => {
                at += 1;
            }
            Some(_) => {
                let (item, next) = parse_operand(toks, at, lineno)?;
                items.push(item);
                at = next;
            }
            None => {
                return Err(ParseError::SyntaxError(
                    lineno,
                    String::from("unterminated list"),
                ))
            }
        }
    }
}

fn parse_params(
    toks: &[Tok],
    mut at: usize,
    lineno: usize,
) -> Result<(Operand, usize), ParseError> {
    let mut params = Vec::new();
    loop {
        match toks.get(at) {
            Some(Tok::RParen) => return Ok((Operand::Params(params), at + 1)),
            Some(Tok::Comma) => {
                at += 1;
            }
            Some(Tok::Word(ty)) => {
                let tag = TypeTag::from_str(ty).ok_or_else(|| {
                    ParseError::SyntaxError(lineno, format!("unknown type {}", ty))
                })?;
                let name = match toks.get(at + 1) {
                    Some(Tok::Word(name)) => name.clone(),
                    _ => {
                        return Err(ParseError::SyntaxError(
                            lineno,
                            String::from("expected a parameter name"),
                        ))
                    }
                };
                params.push((tag, name));
                at += 2;
            }
            _ => {
                return Err(ParseError::SyntaxError(
                    lineno,
                    String::from("unterminated argument list"),
                ))
            }
        }
    }
}

fn parse_text(source: &str) -> ParseResult {
    let mut code = Vec::new();
    for (i, line) in source.lines().enumerate() {
        if let Some(instr) = parse_line(line, i + 1)? {
            code.push(instr);
        }
    }
    Ok(code)
}


// ------------------------------------------------------------------
// JSON format

fn parse_json(source: &str) -> ParseResult {
    let value: serde_json::Value =
        serde_json::from_str(source).map_err(|e| ParseError::JsonError(e.to_string()))?;
    let rows = value
        .as_array()
        .ok_or_else(|| ParseError::JsonError(String::from("expected a top-level array")))?;
    rows.iter().map(json_instruction).collect()
}

fn json_instruction(row: &serde_json::Value) -> Result<Instruction, ParseError> {
    let tup = row
        .as_array()
        .ok_or_else(|| ParseError::JsonError(String::from("instruction is not an array")))?;
    let op = tup
        .get(0)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ParseError::JsonError(String::from("missing opcode")))?;

    let params_slot = op.starts_with("define");
    let mut args = Vec::new();
    for (i, v) in tup[1..].iter().enumerate() {
        args.push(json_operand(v, params_slot && i == 1)?);
    }

    let mut instr = Instruction::new(op, args);
    fixup(&mut instr);
    Ok(instr)
}

fn json_operand(v: &serde_json::Value, params: bool) -> Result<Operand, ParseError> {
    use serde_json::Value;
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Operand::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Operand::Float(f))
            } else {
                Err(ParseError::JsonError(format!("bad number {}", n)))
            }
        }
        Value::String(s) => {
            if s.starts_with('@') || s.starts_with('%') || s.ends_with(':') {
                Ok(Operand::Name(s.clone()))
            } else {
                Ok(Operand::Str(s.clone()))
            }
        }
        Value::Array(items) if params => {
            let mut out = Vec::new();
            for item in items {
                let pair = item.as_array().filter(|p| p.len() == 2).ok_or_else(|| {
                    ParseError::JsonError(String::from("argument is not a [type, name] pair"))
                })?;
                let ty = pair[0]
                    .as_str()
                    .and_then(TypeTag::from_str)
                    .ok_or_else(|| ParseError::JsonError(String::from("bad argument type")))?;
                let name = pair[1]
                    .as_str()
                    .ok_or_else(|| ParseError::JsonError(String::from("bad argument name")))?;
                out.push((ty, name.to_string()));
            }
            Ok(Operand::Params(out))
        }
        Value::Array(items) => {
            let out: Result<Vec<Operand>, ParseError> =
                items.iter().map(|v| json_operand(v, false)).collect();
            Ok(Operand::List(out?))
        }
        other => Err(ParseError::JsonError(format!("bad operand {}", other))),
    }
}


// Shared post-pass: character literals arrive as quoted strings, and
// label operands of branches may arrive as plain strings.
fn fixup(instr: &mut Instruction) {
    let decoded = match decode(&instr.op) {
        Some(d) => d,
        None => return,
    };
    match decoded.op {
        Op::Literal if decoded.ty == Some(TypeTag::Char) => {
            if let Some(Operand::Str(s)) = instr.args.get(0) {
                let text = s.trim_matches('\'');
                if let Some(c) = text.chars().next() {
                    instr.args[0] = Operand::Char(c);
                }
            }
        }
        Op::Jump | Op::Cbranch => {
            for a in instr.args.iter_mut() {
                if let Operand::Str(s) = a {
                    *a = Operand::Name(s.clone());
                }
            }
        }
        _ => {}
    }
}
