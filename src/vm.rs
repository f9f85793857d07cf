// ucir: an interpreter for the uC intermediate representation.
//
// Copyright (C) 2019  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.
//
// The uCIR execution engine.
//
// *Execution Model*
//
// A program is a flat list of instruction tuples. Memory is a single
// fixed-capacity array of cells addressed by integer offset; globals,
// locals, temporaries and array storage all live there, carved out by
// a bump allocator whose cursor (the high-water offset) is saved and
// restored across calls.
//
// Execution happens in two passes. The loader walks the whole program
// once, reserving cells for each `global_*` definition and recording
// the entry point of each `define_*` (the entry PC is itself stored
// in a cell, so function values are first class). The second pass
// starts at `@main` and interprets one instruction at a time: fetch,
// advance the program counter, decode the opcode name, dispatch.
// Branching instructions simply overwrite the program counter.
//
// *Names*
//
// `@name` operands resolve through the global table, `%name` through
// the table of the current activation. Labels live in the activation
// table too, bound when the enclosing function is entered. Both
// tables map names to cell offsets; label bindings carry a PC
// instead, and the two are kept apart by the Binding type so a label
// used as a value is caught rather than silently dereferenced.
//
// *Validity*
//
// Runtime failures are the Error enum below. A fatal error aborts the
// run; unknown opcodes and malformed input tokens are reported on the
// error channel and execution continues. Clean termination is the
// Exit variant, carrying the program's exit status up through `run`.
//
// *The engine value*
//
// All interpreter state is owned by an Engine. The embedding hands
// `run` the three text channels through Io, so programs, the
// debugger, and tests all talk to the same interface.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::io::{BufRead, Write};
use std::mem;
use std::rc::Rc;

use enumflags2::BitFlags;

use crate::config::Config;
use crate::debug;
use crate::ir::{decode, Instruction, Op, Operand, Shape, TypeTag};


pub type Result<T> = core::result::Result<T, Error>;


// The dynamic kind of a cell, for error reporting only: handlers
// trust the opcode's type tag and never check what a cell holds
// before overwriting it.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Kind {
    Empty = 0b00000001,
    Int   = 0b00000010,
    Float = 0b00000100,
    Char  = 0b00001000,
    Bool  = 0b00010000,
    Str   = 0b00100000,
    Addr  = 0b01000000,
    Code  = 0b10000000,
}

pub type KindSet = BitFlags<Kind>;


#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    IllegalAddr(usize),
    NameError(String),
    NotACell(String),
    NotALabel(String),
    TypeError { expect: KindSet, got: Kind },
    TypeMismatch(Kind, Kind),
    DivisionByZero,
    EndOfInput,
    BadInstruction(String),
    BadFrame,
    Io(String),
    // Not a failure: carries the exit status out of the main loop.
    Exit(i64),
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IllegalAddr(at) => write!(f, "illegal memory address {}", at),
            Error::NameError(name) => write!(f, "undefined name {}", name),
            Error::NotACell(name) => write!(f, "{} names a label, not a value", name),
            Error::NotALabel(name) => write!(f, "{} does not name a label", name),
            Error::TypeError { expect, got } => {
                write!(f, "expected {:?}, got {:?}", expect, got)
            }
            Error::TypeMismatch(a, b) => write!(f, "type mismatch: {:?} vs {:?}", a, b),
            Error::DivisionByZero => write!(f, "division by zero"),
            Error::EndOfInput => write!(f, "unexpected end of input"),
            Error::BadInstruction(op) => write!(f, "malformed instruction {}", op),
            Error::BadFrame => write!(f, "call frame mismatch"),
            Error::Io(e) => write!(f, "i/o error: {}", e),
            Error::Exit(code) => write!(f, "exit {}", code),
        }
    }
}


// Construct an Error::TypeError from a value.
fn expected(expect: KindSet, got: &Value) -> Error {
    Error::TypeError {
        expect,
        got: got.kind(),
    }
}

// Construct an Error::TypeMismatch from a pair of values.
fn type_mismatch(a: &Value, b: &Value) -> Error {
    Error::TypeMismatch(a.kind(), b.kind())
}


// One memory cell. Addr is a cell offset (this is how pointers are
// represented); Code is a program counter (how function entry points
// are represented). Unused cells hold Empty.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Empty,
    Int(i64),
    Float(f64),
    Char(char),
    Bool(bool),
    Str(Rc<String>),
    Addr(usize),
    Code(usize),
}


// Factors out the boiler plate in operator method implementations:
// a list of <pattern> => <expr> arms is the white-list of operand
// kinds the operator accepts, and anything else is a runtime error.
macro_rules! operator {
    // Template for a unary operator
    (un $name:ident ($expect:expr) { $( $p:pat => $e:expr ),+ } ) => {
        pub fn $name (&self) -> Result<Value> {
            use Value::*;
            match self {
                $($p => Ok($e)),+ ,
                value => Err(expected($expect, value))
            }
        }
    };

    // Template for a binary operator
    (bin $name:ident { $( $p:pat => $e:expr ),+ } ) => {
        pub fn $name (&self, other: &Value) -> Result<Value> {
            use Value::*;
            #[allow(unreachable_patterns)]
            match (self, other) {
                $($p => Ok($e)),+ ,
                (a, b) => Err(type_mismatch(a, b))
            }
        }
    };
}


impl Value {
    operator! { bin add {
        (Int(a),   Int(b))   => Int(a + b),
        (Float(a), Float(b)) => Float(a + b)
    } }

    operator! { bin sub {
        (Int(a),   Int(b))   => Int(a - b),
        (Float(a), Float(b)) => Float(a - b)
    } }

    operator! { bin mul {
        (Int(a),   Int(b))   => Int(a * b),
        (Float(a), Float(b)) => Float(a * b)
    } }

    // Integer division rounds toward negative infinity; float
    // division is true division.
    pub fn div(&self, other: &Value) -> Result<Value> {
        use Value::*;
        match (self, other) {
            (Int(_), Int(0)) => Err(Error::DivisionByZero),
            (Int(a), Int(b)) => Ok(Int(crate::util::floor_div(*a, *b))),
            (Float(a), Float(b)) => Ok(Float(a / b)),
            (a, b) => Err(type_mismatch(a, b)),
        }
    }

    pub fn modulo(&self, other: &Value) -> Result<Value> {
        use Value::*;
        match (self, other) {
            (Int(_), Int(0)) => Err(Error::DivisionByZero),
            (Int(a), Int(b)) => Ok(Int(crate::util::floor_rem(*a, *b))),
            (Float(a), Float(b)) => Ok(Float(a % b)),
            (a, b) => Err(type_mismatch(a, b)),
        }
    }

    operator! { bin lt {
        (Int(a),   Int(b))   => Bool(a < b),
        (Float(a), Float(b)) => Bool(a < b),
        (Char(a),  Char(b))  => Bool(a < b),
        (Str(a),   Str(b))   => Bool(a < b)
    } }

    operator! { bin le {
        (Int(a),   Int(b))   => Bool(a <= b),
        (Float(a), Float(b)) => Bool(a <= b),
        (Char(a),  Char(b))  => Bool(a <= b),
        (Str(a),   Str(b))   => Bool(a <= b)
    } }

    operator! { bin gt {
        (Int(a),   Int(b))   => Bool(a > b),
        (Float(a), Float(b)) => Bool(a > b),
        (Char(a),  Char(b))  => Bool(a > b),
        (Str(a),   Str(b))   => Bool(a > b)
    } }

    operator! { bin ge {
        (Int(a),   Int(b))   => Bool(a >= b),
        (Float(a), Float(b)) => Bool(a >= b),
        (Char(a),  Char(b))  => Bool(a >= b),
        (Str(a),   Str(b))   => Bool(a >= b)
    } }

    operator! { bin eq {
        (Empty,    Empty)    => Bool(true),
        (Int(a),   Int(b))   => Bool(a == b),
        (Float(a), Float(b)) => Bool(a == b),
        (Char(a),  Char(b))  => Bool(a == b),
        (Bool(a),  Bool(b))  => Bool(a == b),
        (Str(a),   Str(b))   => Bool(a == b),
        (Addr(a),  Addr(b))  => Bool(a == b),
        (Code(a),  Code(b))  => Bool(a == b),
        // Evaluate to false on kind mismatch
        (_,        _)        => Bool(false)
    } }

    pub fn ne(&self, other: &Value) -> Result<Value> {
        self.eq(other)?.not()
    }

    operator! { bin and {
        (Bool(a), Bool(b)) => Bool(*a && *b)
    } }

    operator! { bin or {
        (Bool(a), Bool(b)) => Bool(*a || *b)
    } }

    operator! { un not (BitFlags::from_flag(Kind::Bool)) {
        Bool(a) => Bool(!a)
    } }

    // Truthiness as cbranch sees it.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Empty => false,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Char(_) => true,
            Value::Bool(v) => *v,
            Value::Str(s) => !s.is_empty(),
            Value::Addr(a) => *a != 0,
            Value::Code(p) => *p != 0,
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            v => Err(expected(BitFlags::from_flag(Kind::Int), v)),
        }
    }

    pub fn as_addr(&self) -> Result<usize> {
        match self {
            Value::Addr(a) => Ok(*a),
            v => Err(expected(BitFlags::from_flag(Kind::Addr), v)),
        }
    }

    pub fn as_code(&self) -> Result<usize> {
        match self {
            Value::Code(p) => Ok(*p),
            v => Err(expected(BitFlags::from_flag(Kind::Code), v)),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Empty => Kind::Empty,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Char(_) => Kind::Char,
            Value::Bool(_) => Kind::Bool,
            Value::Str(_) => Kind::Str,
            Value::Addr(_) => Kind::Addr,
            Value::Code(_) => Kind::Code,
        }
    }

    // The initial contents of a freshly allocated scalar.
    pub fn zero(ty: TypeTag) -> Value {
        match ty {
            TypeTag::Int => Value::Int(0),
            TypeTag::Float => Value::Float(0.0),
            TypeTag::Char => Value::Char('\0'),
            TypeTag::Bool => Value::Bool(false),
            TypeTag::Void | TypeTag::Str => Value::Empty,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Char(c) => write!(f, "{}", c),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Addr(a) => write!(f, "{}", a),
            Value::Code(p) => write!(f, "{}", p),
        }
    }
}


// What a name in the activation table stands for.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Binding {
    Cell(usize),
    Label(usize),
}


// The cell array. Out-of-range access is fatal; kind confusion is
// not, the opcode's type tag is authoritative.
pub struct Memory {
    cells: Vec<Value>,
}

impl Memory {
    pub fn new(size: usize) -> Memory {
        Memory {
            cells: vec![Value::Empty; size],
        }
    }

    pub fn read(&self, at: usize) -> Result<Value> {
        self.cells.get(at).cloned().ok_or(Error::IllegalAddr(at))
    }

    pub fn write(&mut self, at: usize, value: Value) -> Result<()> {
        match self.cells.get_mut(at) {
            Some(cell) => {
                *cell = value;
                Ok(())
            }
            None => Err(Error::IllegalAddr(at)),
        }
    }

    // Contiguous cell-to-cell copy. A character sequence in the
    // source cell spreads one character per destination cell.
    pub fn blit(&mut self, dst: usize, src: usize, len: usize) -> Result<()> {
        if let Value::Str(s) = self.read(src)? {
            for (i, c) in s.chars().take(len).enumerate() {
                self.write(dst + i, Value::Char(c))?;
            }
            return Ok(());
        }
        for i in 0..len {
            let v = self.read(src + i)?;
            self.write(dst + i, v)?;
        }
        Ok(())
    }
}


// The text channels the engine talks to. Swappable so tests (and any
// other embedding) can capture program output and script input.
pub struct Io<'a> {
    pub cin: &'a mut dyn BufRead,
    pub cout: &'a mut dyn Write,
    pub cerr: &'a mut dyn Write,
}


// Return linkage, pushed by call.
struct Linkage {
    register: String,
    retpc: usize,
}

// Caller state, pushed when the callee's define executes.
struct Scope {
    vars: HashMap<String, Binding>,
    offset: usize,
}


fn name_arg<'a>(instr: &'a Instruction, at: usize) -> Result<&'a str> {
    instr
        .args
        .get(at)
        .and_then(Operand::name)
        .ok_or_else(|| Error::BadInstruction(instr.op.clone()))
}

fn operand(instr: &Instruction, at: usize) -> Result<&Operand> {
    instr
        .args
        .get(at)
        .ok_or_else(|| Error::BadInstruction(instr.op.clone()))
}

fn type_of(ty: Option<TypeTag>, instr: &Instruction) -> Result<TypeTag> {
    ty.ok_or_else(|| Error::BadInstruction(instr.op.clone()))
}

// A literal operand as a cell value.
fn literal_value(op: &Operand) -> Result<Value> {
    match op {
        Operand::Int(v) => Ok(Value::Int(*v)),
        Operand::Float(v) => Ok(Value::Float(*v)),
        Operand::Char(c) => Ok(Value::Char(*c)),
        Operand::Str(s) => Ok(Value::Str(Rc::new(s.clone()))),
        op => Err(Error::BadInstruction(op.to_string())),
    }
}


// The entire interpreter state. Owning everything here (rather than
// in process globals) means two engines can never alias and a run is
// fully repeatable.
pub struct Engine {
    pub(crate) code: Vec<Instruction>,
    pub(crate) mem: Memory,
    pub(crate) globals: HashMap<String, usize>,
    pub(crate) vars: HashMap<String, Binding>,

    // First free cell; the bump allocator cursor.
    offset: usize,

    scopes: Vec<Scope>,
    calls: Vec<Linkage>,
    params: Vec<usize>,

    inputline: VecDeque<String>,

    pub(crate) pc: usize,
    pub(crate) lastpc: usize,
    start: usize,
    pub(crate) debug: bool,
}

impl Engine {
    pub fn new(code: Vec<Instruction>, config: Config) -> Engine {
        Engine {
            code,
            mem: Memory::new(config.memory),
            globals: HashMap::new(),
            vars: HashMap::new(),
            offset: 0,
            scopes: Vec::new(),
            calls: Vec::new(),
            params: Vec::new(),
            inputline: VecDeque::new(),
            pc: 0,
            lastpc: 0,
            start: 0,
            debug: config.debug,
        }
    }

    // Run the program to completion and return its exit status.
    pub fn run(&mut self, io: &mut Io) -> Result<i64> {
        self.load_globals()?;

        if self.debug {
            writeln!(io.cout, "Interpreter running in debug mode:")?;
            debug::show_help(io)?;
        }

        self.pc = self.start;
        let status = self.exec(io);
        io.cout.flush()?;
        match status {
            Ok(()) => Ok(0),
            Err(Error::Exit(code)) => Ok(code),
            Err(e) => Err(e),
        }
    }

    // First pass: reserve cells for globals and record function entry
    // points. Everything else is skipped.
    fn load_globals(&mut self) -> Result<()> {
        self.pc = 0;
        self.offset = 0;
        while self.pc < self.code.len() {
            let instr = self.code[self.pc].clone();
            if !instr.args.is_empty() {
                match decode(&instr.op) {
                    Some(decoded) if decoded.op == Op::Global => {
                        self.load_global(&instr, decoded.shape)?;
                    }
                    Some(decoded) if decoded.op == Op::Define => {
                        let name = name_arg(&instr, 0)?;
                        self.globals.insert(name.to_string(), self.offset);
                        self.mem.write(self.offset, Value::Code(self.pc))?;
                        self.offset += 1;
                        if name == "@main" {
                            self.start = self.pc;
                        }
                    }
                    _ => {}
                }
            }
            self.pc += 1;
        }
        self.lastpc = self.code.len();
        Ok(())
    }

    fn load_global(&mut self, instr: &Instruction, shape: Option<Shape>) -> Result<()> {
        let name = name_arg(instr, 0)?;
        self.globals.insert(name.to_string(), self.offset);
        match shape {
            None => {
                // Scalars and whole character sequences take one cell.
                if let Some(init) = instr.args.get(1) {
                    let v = literal_value(init)?;
                    self.mem.write(self.offset, v)?;
                }
                self.offset += 1;
            }
            Some(shape) => {
                if let Some(init) = instr.args.get(1) {
                    self.copy_data(self.offset, shape.elems, init)?;
                }
                self.offset += shape.elems;
            }
        }
        Ok(())
    }

    // Spread an initializer over consecutive cells: strings go one
    // character per cell, nested lists flatten one level.
    fn copy_data(&mut self, at: usize, size: usize, init: &Operand) -> Result<()> {
        match init {
            Operand::Str(s) => {
                for (i, c) in s.chars().take(size).enumerate() {
                    self.mem.write(at + i, Value::Char(c))?;
                }
                Ok(())
            }
            Operand::List(items) => {
                let mut flat: Vec<&Operand> = Vec::new();
                for item in items {
                    match item {
                        Operand::List(inner) => flat.extend(inner.iter()),
                        item => flat.push(item),
                    }
                }
                for (i, item) in flat.iter().take(size).enumerate() {
                    let v = literal_value(item)?;
                    self.mem.write(at + i, v)?;
                }
                Ok(())
            }
            op => {
                let v = literal_value(op)?;
                self.mem.write(at, v)
            }
        }
    }

    // The main loop: breakpoint gate, fetch, pre-increment, dispatch.
    fn exec(&mut self, io: &mut Io) -> Result<()> {
        let mut breakpoint: Option<usize> = None;
        loop {
            if let Some(target) = breakpoint {
                if self.pc == target {
                    breakpoint = debug::pause(self, io)?;
                }
            } else if self.debug {
                breakpoint = debug::pause(self, io)?;
            }

            if self.pc >= self.code.len() {
                return Ok(());
            }
            let instr = self.code[self.pc].clone();
            self.pc += 1;
            if instr.is_label() {
                continue;
            }
            self.dispatch(&instr, io)?;
        }
    }

    fn dispatch(&mut self, instr: &Instruction, io: &mut Io) -> Result<()> {
        let decoded = match decode(&instr.op) {
            Some(d) => d,
            None => {
                writeln!(io.cerr, "Warning: no handler for {}", instr.op)?;
                return Ok(());
            }
        };
        let ty = decoded.ty;

        use Op::*;
        match (decoded.op, decoded.shape) {
            (Alloc, None) => self.alloc(type_of(ty, instr)?, instr),
            (Alloc, Some(shape)) => self.alloc_array(instr, shape),
            (Literal, None) => self.literal(instr),
            (Load, None) => self.load(instr),
            (Load, Some(shape)) => self.load_shaped(instr, shape),
            (Store, None) => self.store(instr),
            (Store, Some(shape)) => self.store_shaped(instr, shape),
            (Elem, None) => self.elem(instr),
            (Get, Some(shape)) if shape.depth > 0 => self.get_ref(instr),
            (Jump, None) => self.jump(instr),
            (Cbranch, None) => self.cbranch(instr),
            (Param, None) => self.param(instr),
            (Call, None) => self.call(instr),
            (Define, None) => self.define(type_of(ty, instr)?, instr),
            (Return, None) => self.ret(type_of(ty, instr)?, instr),
            (Print, None) => self.print(type_of(ty, instr)?, instr, io),
            (Read, None) => self.read(type_of(ty, instr)?, instr, false, io),
            (Read, Some(_)) => self.read(type_of(ty, instr)?, instr, true, io),
            (Add, None) | (Sub, None) | (Mul, None) | (Div, None) | (Mod, None)
            | (Lt, None) | (Le, None) | (Gt, None) | (Ge, None) | (Eq, None)
            | (Ne, None) | (And, None) | (Or, None) => self.binary(decoded.op, instr),
            (Not, None) => self.unary_not(instr),
            (Sitofp, None) => self.sitofp(instr),
            (Fptosi, None) => self.fptosi(instr),
            _ => {
                writeln!(io.cerr, "Warning: no handler for {}", instr.op)?;
                Ok(())
            }
        }
    }

    //
    // Name resolution
    //

    // Bind a fresh register to the next free cell, or return the
    // existing binding.
    fn alloc_reg(&mut self, name: &str) -> Result<usize> {
        if let Some(binding) = self.vars.get(name) {
            return match *binding {
                Binding::Cell(at) => Ok(at),
                Binding::Label(_) => Err(Error::NotACell(name.to_string())),
            };
        }
        let at = self.offset;
        self.vars.insert(name.to_string(), Binding::Cell(at));
        self.offset += 1;
        Ok(at)
    }

    fn address(&self, name: &str) -> Result<usize> {
        if name.starts_with('@') {
            self.globals
                .get(name)
                .copied()
                .ok_or_else(|| Error::NameError(name.to_string()))
        } else {
            match self.vars.get(name) {
                Some(Binding::Cell(at)) => Ok(*at),
                Some(Binding::Label(_)) => Err(Error::NotACell(name.to_string())),
                None => Err(Error::NameError(name.to_string())),
            }
        }
    }

    fn value(&self, name: &str) -> Result<Value> {
        self.mem.read(self.address(name)?)
    }

    // Label references arrive spelled three ways ("end", "end:",
    // "%end") depending on the producer; normalize before lookup.
    fn label(&self, name: &str) -> Result<usize> {
        let stripped = name.trim_end_matches(':');
        let key = if stripped.starts_with('%') {
            stripped.to_string()
        } else {
            format!("%{}", stripped)
        };
        match self.vars.get(&key) {
            Some(Binding::Label(pc)) => Ok(*pc),
            Some(Binding::Cell(_)) => Err(Error::NotALabel(name.to_string())),
            None => Err(Error::NameError(name.to_string())),
        }
    }

    // Bind every label between here and the next define to the PC of
    // the instruction after it. Runs on function entry, so references
    // are resolved before any instruction in the body executes.
    fn alloc_labels(&mut self) {
        let mut lpc = self.pc;
        while lpc < self.code.len() {
            let instr = &self.code[lpc];
            lpc += 1;
            if instr.op.starts_with("define") {
                break;
            }
            if instr.is_label() {
                let stripped = instr.op.trim_end_matches(':');
                let name = if stripped.starts_with('%') {
                    stripped.to_string()
                } else {
                    format!("%{}", stripped)
                };
                self.vars.insert(name, Binding::Label(lpc));
            }
        }
    }

    // Pop one whitespace-delimited token, refilling the buffer a line
    // at a time.
    fn next_token(&mut self, io: &mut Io) -> Result<String> {
        loop {
            if let Some(token) = self.inputline.pop_front() {
                return Ok(token);
            }
            let mut line = String::new();
            if io.cin.read_line(&mut line)? == 0 {
                writeln!(io.cerr, "Unexpected end of input file.")?;
                return Err(Error::EndOfInput);
            }
            self.inputline
                .extend(line.split_whitespace().map(String::from));
        }
    }

    //
    // Handlers
    //

    fn alloc(&mut self, ty: TypeTag, instr: &Instruction) -> Result<()> {
        let at = self.alloc_reg(name_arg(instr, 0)?)?;
        self.mem.write(at, Value::zero(ty))
    }

    fn alloc_array(&mut self, instr: &Instruction, shape: Shape) -> Result<()> {
        let name = name_arg(instr, 0)?;
        let at = self.offset;
        self.vars.insert(name.to_string(), Binding::Cell(at));
        self.offset += shape.elems;
        for i in 0..shape.elems {
            self.mem.write(at + i, Value::Int(0))?;
        }
        Ok(())
    }

    fn literal(&mut self, instr: &Instruction) -> Result<()> {
        let value = literal_value(operand(instr, 0)?)?;
        let at = self.alloc_reg(name_arg(instr, 1)?)?;
        self.mem.write(at, value)
    }

    fn load(&mut self, instr: &Instruction) -> Result<()> {
        let value = self.value(name_arg(instr, 0)?)?;
        let at = self.alloc_reg(name_arg(instr, 1)?)?;
        self.mem.write(at, value)
    }

    fn load_shaped(&mut self, instr: &Instruction, shape: Shape) -> Result<()> {
        let source = name_arg(instr, 0)?;
        let target = name_arg(instr, 1)?;
        if shape.depth == 0 {
            // Copy a whole array into a fresh region.
            let from = self.address(source)?;
            let to = self.offset;
            self.vars.insert(target.to_string(), Binding::Cell(to));
            self.offset += shape.elems;
            self.mem.blit(to, from, shape.elems)
        } else if shape.depth == 1 && shape.elems == 1 {
            // Dereference.
            let from = self.value(source)?.as_addr()?;
            let value = self.mem.read(from)?;
            let at = self.alloc_reg(target)?;
            self.mem.write(at, value)
        } else {
            // Mixed dims and indirection never appears in produced
            // code; leave it inert rather than guess.
            Ok(())
        }
    }

    fn store(&mut self, instr: &Instruction) -> Result<()> {
        let value = self.value(name_arg(instr, 0)?)?;
        let at = self.address(name_arg(instr, 1)?)?;
        self.mem.write(at, value)
    }

    fn store_shaped(&mut self, instr: &Instruction, shape: Shape) -> Result<()> {
        let source = name_arg(instr, 0)?;
        let target = name_arg(instr, 1)?;
        if shape.depth == 0 {
            let from = self.address(source)?;
            let to = self.address(target)?;
            self.mem.blit(to, from, shape.elems)
        } else if shape.depth == 1 && shape.elems == 1 {
            // Write through the pointer held by target.
            let value = self.value(source)?;
            let at = self.value(target)?.as_addr()?;
            self.mem.write(at, value)
        } else {
            Ok(())
        }
    }

    fn elem(&mut self, instr: &Instruction) -> Result<()> {
        let base = self.address(name_arg(instr, 0)?)?;
        let index = self.value(name_arg(instr, 1)?)?.as_int()?;
        let target = name_arg(instr, 2)?;
        let address = (base as i64)
            .checked_add(index)
            .filter(|a| *a >= 0)
            .ok_or(Error::IllegalAddr(base))?;
        let at = self.alloc_reg(target)?;
        self.mem.write(at, Value::Addr(address as usize))
    }

    fn get_ref(&mut self, instr: &Instruction) -> Result<()> {
        let address = self.address(name_arg(instr, 0)?)?;
        let at = self.alloc_reg(name_arg(instr, 1)?)?;
        self.mem.write(at, Value::Addr(address))
    }

    fn jump(&mut self, instr: &Instruction) -> Result<()> {
        self.pc = self.label(name_arg(instr, 0)?)?;
        Ok(())
    }

    fn cbranch(&mut self, instr: &Instruction) -> Result<()> {
        let test = self.value(name_arg(instr, 0)?)?;
        let target = if test.truthy() {
            name_arg(instr, 1)?
        } else {
            name_arg(instr, 2)?
        };
        self.pc = self.label(target)?;
        Ok(())
    }

    fn param(&mut self, instr: &Instruction) -> Result<()> {
        let at = self.address(name_arg(instr, 0)?)?;
        self.params.push(at);
        Ok(())
    }

    fn call(&mut self, instr: &Instruction) -> Result<()> {
        let source = name_arg(instr, 0)?;
        let target = name_arg(instr, 1)?;
        self.alloc_reg(target)?;
        self.calls.push(Linkage {
            register: target.to_string(),
            retpc: self.pc,
        });
        self.pc = self.value(source)?.as_code()?;
        Ok(())
    }

    // Function entry. For @main there is no caller state to save; for
    // everything else: save the caller's table and allocation cursor,
    // start a fresh table, copy one cell per pending parameter, and
    // resolve the body's labels.
    fn define(&mut self, ty: TypeTag, instr: &Instruction) -> Result<()> {
        let name = name_arg(instr, 0)?;
        if name == "@main" {
            self.alloc_reg("%0")?;
            self.alloc_labels();
            return Ok(());
        }

        let locs: Vec<String> = match instr.args.get(1) {
            Some(Operand::Params(params)) => {
                params.iter().map(|(_, name)| name.clone()).collect()
            }
            _ => return Err(Error::BadInstruction(instr.op.clone())),
        };

        let vars = mem::replace(&mut self.vars, HashMap::new());
        self.scopes.push(Scope {
            vars,
            offset: self.offset,
        });

        if ty == TypeTag::Void {
            let at = self.alloc_reg("%0")?;
            self.mem.write(at, Value::Empty)?;
        }

        let params = mem::replace(&mut self.params, Vec::new());
        for (i, from) in params.into_iter().enumerate() {
            let name = locs
                .get(i)
                .ok_or_else(|| Error::BadInstruction(instr.op.clone()))?;
            let value = self.mem.read(from)?;
            self.vars.insert(name.clone(), Binding::Cell(self.offset));
            self.mem.write(self.offset, value)?;
            self.offset += 1;
        }

        self.alloc_labels();
        Ok(())
    }

    fn ret(&mut self, ty: TypeTag, instr: &Instruction) -> Result<()> {
        let value = if ty == TypeTag::Void {
            Value::Empty
        } else {
            self.value(name_arg(instr, 0)?)?
        };

        if let Some(link) = self.calls.pop() {
            let scope = self.scopes.pop().ok_or(Error::BadFrame)?;
            self.vars = scope.vars;
            // The target register resolves in the restored table.
            let at = self.address(&link.register)?;
            self.mem.write(at, value)?;
            self.offset = scope.offset;
            self.pc = link.retpc;
            Ok(())
        } else {
            // Returning from @main terminates the run.
            Err(Error::Exit(match value {
                Value::Int(code) => code,
                _ => 0,
            }))
        }
    }

    fn print(&mut self, ty: TypeTag, instr: &Instruction, io: &mut Io) -> Result<()> {
        if ty == TypeTag::Void {
            writeln!(io.cout)?;
        } else {
            let value = self.value(name_arg(instr, 0)?)?;
            write!(io.cout, "{}", value)?;
        }
        io.cout.flush()?;
        Ok(())
    }

    fn read(
        &mut self,
        ty: TypeTag,
        instr: &Instruction,
        deref: bool,
        io: &mut Io,
    ) -> Result<()> {
        let token = self.next_token(io)?;
        let value = match ty {
            TypeTag::Int => match token.parse::<i64>() {
                Ok(v) => Value::Int(v),
                Err(_) => {
                    writeln!(io.cerr, "Illegal input value.")?;
                    Value::Str(Rc::new(token))
                }
            },
            TypeTag::Float => match token.parse::<f64>() {
                Ok(v) => Value::Float(v),
                Err(_) => {
                    writeln!(io.cerr, "Illegal input value.")?;
                    Value::Str(Rc::new(token))
                }
            },
            TypeTag::Char => {
                let mut chars = token.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::Char(c),
                    _ => Value::Str(Rc::new(token)),
                }
            }
            _ => return Err(Error::BadInstruction(instr.op.clone())),
        };

        let name = name_arg(instr, 0)?;
        if deref {
            let at = self.value(name)?.as_addr()?;
            self.mem.write(at, value)
        } else {
            let at = self.address(name)?;
            self.mem.write(at, value)
        }
    }

    fn binary(&mut self, op: Op, instr: &Instruction) -> Result<()> {
        let a = self.value(name_arg(instr, 0)?)?;
        let b = self.value(name_arg(instr, 1)?)?;
        let target = name_arg(instr, 2)?;
        let value = match op {
            Op::Add => a.add(&b),
            Op::Sub => a.sub(&b),
            Op::Mul => a.mul(&b),
            Op::Div => a.div(&b),
            Op::Mod => a.modulo(&b),
            Op::Lt => a.lt(&b),
            Op::Le => a.le(&b),
            Op::Gt => a.gt(&b),
            Op::Ge => a.ge(&b),
            Op::Eq => a.eq(&b),
            Op::Ne => a.ne(&b),
            Op::And => a.and(&b),
            Op::Or => a.or(&b),
            _ => Err(Error::BadInstruction(instr.op.clone())),
        }?;
        let at = self.alloc_reg(target)?;
        self.mem.write(at, value)
    }

    fn unary_not(&mut self, instr: &Instruction) -> Result<()> {
        let value = self.value(name_arg(instr, 0)?)?.not()?;
        let at = self.alloc_reg(name_arg(instr, 1)?)?;
        self.mem.write(at, value)
    }

    fn sitofp(&mut self, instr: &Instruction) -> Result<()> {
        let value = match self.value(name_arg(instr, 0)?)? {
            Value::Int(v) => Value::Float(v as f64),
            Value::Bool(b) => Value::Float(b as i64 as f64),
            v => return Err(expected(BitFlags::from_flag(Kind::Int), &v)),
        };
        let at = self.alloc_reg(name_arg(instr, 1)?)?;
        self.mem.write(at, value)
    }

    fn fptosi(&mut self, instr: &Instruction) -> Result<()> {
        let value = match self.value(name_arg(instr, 0)?)? {
            // Truncates toward zero, unlike div.
            Value::Float(v) => Value::Int(v.trunc() as i64),
            v => return Err(expected(BitFlags::from_flag(Kind::Float), &v)),
        };
        let at = self.alloc_reg(name_arg(instr, 1)?)?;
        self.mem.write(at, value)
    }
}


// These tests are written against the observable behavior of the
// engine: what a program prints and what status it exits with. Any
// conforming implementation should pass them.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use std::io::Cursor;

    fn engine(text: &str, config: Config) -> Engine {
        let code = parser::parse(text).expect("program should parse");
        Engine::new(code, config)
    }

    // Run a program, feeding it `input`; return exit code, stdout,
    // and stderr.
    fn run_with(text: &str, input: &str, config: Config) -> (Result<i64>, String, String) {
        let mut engine = engine(text, config);
        let mut cin = Cursor::new(input.as_bytes().to_vec());
        let mut cout: Vec<u8> = Vec::new();
        let mut cerr: Vec<u8> = Vec::new();
        let status = {
            let mut io = Io {
                cin: &mut cin,
                cout: &mut cout,
                cerr: &mut cerr,
            };
            engine.run(&mut io)
        };
        (
            status,
            String::from_utf8(cout).unwrap(),
            String::from_utf8(cerr).unwrap(),
        )
    }

    fn run_ok(text: &str, input: &str) -> (i64, String) {
        let (status, out, err) = run_with(text, input, Config::default());
        trace!("stderr: {}", err);
        (status.expect("program should not fault"), out)
    }

    fn run_err(text: &str, input: &str) -> Error {
        let (status, _, _) = run_with(text, input, Config::default());
        status.expect_err("program should fault")
    }

    #[test]
    fn test_print_constant() {
        let (code, out) = run_ok(
            "define_void @main ()\n\
             literal_int 42 %1\n\
             print_int %1\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "42\n");
    }

    #[test]
    fn test_add_and_compare() {
        let (code, out) = run_ok(
            "define_void @main ()\n\
             literal_int 3 %1\n\
             literal_int 4 %2\n\
             add_int %1 %2 %3\n\
             literal_int 7 %4\n\
             eq_int %3 %4 %5\n\
             print_bool %5\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "true\n");
    }

    #[test]
    fn test_call_with_return_value() {
        let (code, out) = run_ok(
            "define_int @sq (int %x)\n\
             mul_int %x %x %r\n\
             return_int %r\n\
             define_void @main ()\n\
             literal_int 5 %1\n\
             param_int %1\n\
             call @sq %2\n\
             print_int %2\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "25\n");
    }

    #[test]
    fn test_array_store_and_load() {
        let (code, out) = run_ok(
            "define_void @main ()\n\
             alloc_int_3 %a\n\
             literal_int 7 %v\n\
             literal_int 1 %i\n\
             elem_int %a %i %p\n\
             store_int_* %v %p\n\
             load_int_* %p %r\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "7\n");
    }

    #[test]
    fn test_read_and_echo() {
        let (code, out) = run_ok(
            "define_void @main ()\n\
             alloc_int %x\n\
             read_int %x\n\
             load_int %x %t\n\
             print_int %t\n\
             print_void\n\
             return_void\n",
            "11\n",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "11\n");
    }

    #[test]
    fn test_control_flow() {
        let (code, out) = run_ok(
            "define_void @main ()\n\
             literal_int 0 %c\n\
             cbranch %c then: else:\n\
             then:\n\
             literal_int 1 %r\n\
             jump end:\n\
             else:\n\
             literal_int 2 %r\n\
             end:\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "2\n");
    }

    #[test]
    fn test_branch_taken() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             literal_int 1 %c\n\
             cbranch %c then else\n\
             then:\n\
             literal_int 1 %r\n\
             jump end\n\
             else:\n\
             literal_int 2 %r\n\
             end:\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "1\n");
    }

    #[test]
    fn test_exit_status() {
        let (code, _) = run_ok("define_void @main ()\nreturn_void\n", "");
        assert_eq!(code, 0);

        let (code, _) = run_ok(
            "define_int @main ()\n\
             literal_int 0 %1\n\
             return_int %1\n",
            "",
        );
        assert_eq!(code, 0);

        let (code, _) = run_ok(
            "define_int @main ()\n\
             literal_int 7 %1\n\
             return_int %1\n",
            "",
        );
        assert_eq!(code, 7);
    }

    #[test]
    fn test_empty_program_exits_zero() {
        let (code, out) = run_ok("", "");
        assert_eq!(code, 0);
        assert_eq!(out, "");
    }

    #[test]
    fn test_division() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             literal_int 7 %1\n\
             literal_int 2 %2\n\
             div_int %1 %2 %3\n\
             print_int %3\n\
             print_void\n\
             literal_int -7 %4\n\
             div_int %4 %2 %5\n\
             print_int %5\n\
             print_void\n\
             literal_float 7.0 %6\n\
             literal_float 2.0 %7\n\
             div_float %6 %7 %8\n\
             print_float %8\n\
             print_void\n\
             mod_int %4 %2 %9\n\
             print_int %9\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "3\n-4\n3.5\n1\n");
    }

    #[test]
    fn test_division_by_zero() {
        let status = run_err(
            "define_void @main ()\n\
             literal_int 7 %1\n\
             literal_int 0 %2\n\
             div_int %1 %2 %3\n\
             return_void\n",
            "",
        );
        assert_eq!(status, Error::DivisionByZero);
    }

    #[test]
    fn test_illegal_input_value() {
        let (status, out, err) = run_with(
            "define_void @main ()\n\
             alloc_int %x\n\
             read_int %x\n\
             load_int %x %t\n\
             print_int %t\n\
             print_void\n\
             return_void\n",
            "abc\n",
            Config::default(),
        );
        assert_eq!(status, Ok(0));
        assert_eq!(out, "abc\n");
        assert!(err.contains("Illegal input value."));
    }

    #[test]
    fn test_input_exhausted() {
        let (status, _, err) = run_with(
            "define_void @main ()\n\
             alloc_int %x\n\
             read_int %x\n\
             return_void\n",
            "",
            Config::default(),
        );
        assert_eq!(status, Err(Error::EndOfInput));
        assert!(err.contains("Unexpected end of input file."));
    }

    #[test]
    fn test_read_several_tokens_per_line() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             alloc_int %x\n\
             alloc_int %y\n\
             read_int %x\n\
             read_int %y\n\
             load_int %x %a\n\
             load_int %y %b\n\
             add_int %a %b %s\n\
             print_int %s\n\
             print_void\n\
             return_void\n",
            "3 4\n",
        );
        assert_eq!(out, "7\n");
    }

    #[test]
    fn test_read_through_pointer() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             alloc_int_2 %a\n\
             literal_int 1 %i\n\
             elem_int %a %i %p\n\
             read_int_* %p\n\
             load_int_* %p %r\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "33\n",
        );
        assert_eq!(out, "33\n");
    }

    #[test]
    fn test_string_global() {
        let (_, out) = run_ok(
            "global_string @.str 'hello world'\n\
             define_void @main ()\n\
             print_string @.str\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "hello world\n");
    }

    #[test]
    fn test_string_spread_into_char_array() {
        let (_, out) = run_ok(
            "global_string @.s 'abc'\n\
             define_void @main ()\n\
             alloc_char_3 %a\n\
             store_char_3 @.s %a\n\
             literal_int 1 %i\n\
             elem_char %a %i %p\n\
             load_char_* %p %c\n\
             print_char %c\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "b\n");
    }

    #[test]
    fn test_global_array_initializer() {
        let (_, out) = run_ok(
            "global_int_4 @a [10, 20, 30, 40]\n\
             define_void @main ()\n\
             literal_int 2 %i\n\
             elem_int @a %i %p\n\
             load_int_* %p %r\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "30\n");
    }

    #[test]
    fn test_nested_global_initializer_flattens() {
        let (_, out) = run_ok(
            "global_int_2_2 @m [[1, 2], [3, 4]]\n\
             define_void @main ()\n\
             literal_int 3 %i\n\
             elem_int @m %i %p\n\
             load_int_* %p %r\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "4\n");
    }

    #[test]
    fn test_scalar_global_initializer() {
        let (_, out) = run_ok(
            "global_int @x 5\n\
             define_void @main ()\n\
             load_int @x %1\n\
             print_int %1\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "5\n");
    }

    #[test]
    fn test_array_copy() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             alloc_int_3 %a\n\
             literal_int 9 %v\n\
             literal_int 2 %i\n\
             elem_int %a %i %p\n\
             store_int_* %v %p\n\
             load_int_3 %a %b\n\
             elem_int %b %i %q\n\
             load_int_* %q %r\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "9\n");
    }

    #[test]
    fn test_pointer_roundtrip() {
        // load(get(x)) == value stored at x
        let (_, out) = run_ok(
            "define_void @main ()\n\
             alloc_int %x\n\
             literal_int 6 %v\n\
             store_int %v %x\n\
             get_int_* %x %p\n\
             load_int_* %p %r\n\
             print_int %r\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "6\n");
    }

    #[test]
    fn test_recursion() {
        let (code, out) = run_ok(
            "define_int @fact (int %n)\n\
             literal_int 1 %1\n\
             le_int %n %1 %2\n\
             cbranch %2 base rec\n\
             base:\n\
             literal_int 1 %3\n\
             return_int %3\n\
             rec:\n\
             literal_int 1 %4\n\
             sub_int %n %4 %5\n\
             param_int %5\n\
             call @fact %6\n\
             mul_int %n %6 %7\n\
             return_int %7\n\
             define_void @main ()\n\
             literal_int 5 %1\n\
             param_int %1\n\
             call @fact %2\n\
             print_int %2\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "120\n");
    }

    #[test]
    fn test_locals_survive_a_call() {
        // The callee reuses the caller's register names; after the
        // return, only the call target register may have changed.
        let (_, out) = run_ok(
            "define_int @sq (int %x)\n\
             mul_int %x %x %1\n\
             return_int %1\n\
             define_void @main ()\n\
             literal_int 3 %1\n\
             param_int %1\n\
             call @sq %2\n\
             print_int %1\n\
             print_void\n\
             print_int %2\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "3\n9\n");
    }

    #[test]
    fn test_two_calls_reuse_memory() {
        let (_, out) = run_ok(
            "define_int @sq (int %x)\n\
             mul_int %x %x %1\n\
             return_int %1\n\
             define_void @main ()\n\
             literal_int 3 %1\n\
             param_int %1\n\
             call @sq %2\n\
             literal_int 4 %3\n\
             param_int %3\n\
             call @sq %4\n\
             add_int %2 %4 %5\n\
             print_int %5\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "25\n");
    }

    #[test]
    fn test_void_call_stores_empty() {
        let (_, out) = run_ok(
            "define_void @noop ()\n\
             return_void\n\
             define_void @main ()\n\
             call @noop %t\n\
             print_int %t\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "\n");
    }

    #[test]
    fn test_multiple_params() {
        let (_, out) = run_ok(
            "define_int @sub2 (int %a, int %b)\n\
             sub_int %a %b %1\n\
             return_int %1\n\
             define_void @main ()\n\
             literal_int 10 %1\n\
             literal_int 4 %2\n\
             param_int %1\n\
             param_int %2\n\
             call @sub2 %3\n\
             print_int %3\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "6\n");
    }

    #[test]
    fn test_unknown_opcode_continues() {
        let (status, out, err) = run_with(
            "define_void @main ()\n\
             frobnicate_int %1\n\
             literal_int 1 %2\n\
             print_int %2\n\
             print_void\n\
             return_void\n",
            "",
            Config::default(),
        );
        assert_eq!(status, Ok(0));
        assert_eq!(out, "1\n");
        assert!(err.contains("no handler for frobnicate_int"));
    }

    #[test]
    fn test_scalar_get_is_diagnosed() {
        let (status, _, err) = run_with(
            "define_void @main ()\n\
             alloc_int %x\n\
             get_int %x %p\n\
             return_void\n",
            "",
            Config::default(),
        );
        assert_eq!(status, Ok(0));
        assert!(err.contains("no handler for get_int"));
    }

    #[test]
    fn test_undefined_name_is_fatal() {
        let status = run_err(
            "define_void @main ()\n\
             print_int %missing\n\
             return_void\n",
            "",
        );
        assert_eq!(status, Error::NameError(String::from("%missing")));
    }

    #[test]
    fn test_casts() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             literal_int 3 %1\n\
             sitofp %1 %2\n\
             print_float %2\n\
             print_void\n\
             literal_float -3.9 %3\n\
             fptosi %3 %4\n\
             print_int %4\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "3\n-3\n");
    }

    #[test]
    fn test_char_comparison() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             literal_char 'a' %1\n\
             literal_char 'b' %2\n\
             lt_char %1 %2 %3\n\
             print_bool %3\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "true\n");
    }

    #[test]
    fn test_bool_ops() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             literal_int 1 %1\n\
             literal_int 2 %2\n\
             lt_int %1 %2 %t\n\
             gt_int %1 %2 %f\n\
             and_bool %t %f %3\n\
             or_bool %t %f %4\n\
             not_bool %t %5\n\
             print_bool %3\n\
             print_bool %4\n\
             print_bool %5\n\
             print_void\n\
             return_void\n",
            "",
        );
        assert_eq!(out, "falsetruefalse\n");
    }

    #[test]
    fn test_char_echo() {
        let (_, out) = run_ok(
            "define_void @main ()\n\
             alloc_char %c\n\
             read_char %c\n\
             load_char %c %1\n\
             print_char %1\n\
             print_void\n\
             return_void\n",
            "z\n",
        );
        assert_eq!(out, "z\n");
    }

    #[test]
    fn test_json_program() {
        let (code, out) = run_ok(
            r#"[["define_int", "@sq", [["int", "%x"]]],
                ["mul_int", "%x", "%x", "%r"],
                ["return_int", "%r"],
                ["define_void", "@main", []],
                ["literal_int", 5, "%1"],
                ["param_int", "%1"],
                ["call", "@sq", "%2"],
                ["print_int", "%2"],
                ["print_void"],
                ["return_void"]]"#,
            "",
        );
        assert_eq!(code, 0);
        assert_eq!(out, "25\n");
    }

    #[test]
    fn test_memory_bounds() {
        let mut mem = Memory::new(4);
        assert_eq!(mem.write(3, Value::Int(1)), Ok(()));
        assert_eq!(mem.read(3), Ok(Value::Int(1)));
        assert_eq!(mem.read(4), Err(Error::IllegalAddr(4)));
        assert_eq!(mem.write(4, Value::Int(1)), Err(Error::IllegalAddr(4)));
    }

    #[test]
    fn test_memory_blit_spreads_strings() {
        let mut mem = Memory::new(8);
        mem.write(0, Value::Str(Rc::new(String::from("hi")))).unwrap();
        mem.blit(1, 0, 2).unwrap();
        assert_eq!(mem.read(1), Ok(Value::Char('h')));
        assert_eq!(mem.read(2), Ok(Value::Char('i')));
    }

    #[test]
    fn test_out_of_memory_is_fatal() {
        let (status, _, _) = run_with(
            "define_void @main ()\n\
             alloc_int_64 %a\n\
             return_void\n",
            "",
            Config {
                memory: 16,
                debug: false,
            },
        );
        assert_eq!(status, Err(Error::IllegalAddr(16)));
    }

    #[test]
    fn test_value_operators() {
        use Value::*;
        assert_eq!(Int(2).add(&Int(3)), Ok(Int(5)));
        assert_eq!(Float(2.0).mul(&Float(3.0)), Ok(Float(6.0)));
        assert_eq!(Int(7).div(&Int(2)), Ok(Int(3)));
        assert_eq!(Int(-7).div(&Int(2)), Ok(Int(-4)));
        assert_eq!(Float(7.0).div(&Float(2.0)), Ok(Float(3.5)));
        assert_eq!(Int(1).div(&Int(0)), Err(Error::DivisionByZero));
        assert_eq!(
            Int(1).add(&Float(2.0)),
            Err(Error::TypeMismatch(Kind::Int, Kind::Float))
        );
        assert_eq!(Int(1).eq(&Float(1.0)), Ok(Bool(false)));
        assert_eq!(Int(1).ne(&Float(1.0)), Ok(Bool(true)));
        assert_eq!(Empty.eq(&Empty), Ok(Bool(true)));
        assert_eq!(Bool(true).and(&Bool(false)), Ok(Bool(false)));
        assert_eq!(
            Bool(true).and(&Int(1)),
            Err(Error::TypeMismatch(Kind::Bool, Kind::Int))
        );
        assert!(Int(1).truthy());
        assert!(!Int(0).truthy());
        assert!(!Empty.truthy());
        assert!(Str(Rc::new(String::from("x"))).truthy());
    }
}
