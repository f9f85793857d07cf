// The uCIR instruction model.
//
// An instruction is an opcode string plus an operand list, mirroring
// the tuples the compiler emits. Type and array shape are baked into
// the opcode name ("load_int_5_*"), so executing an instruction always
// starts by decoding the name into an operation tag, a type tag, and a
// shape. The decoder lives here, next to the model, along with the
// human-readable formatter the debugger uses.

use std::fmt;


// Canonical operations. The opcode name's first segment maps onto one
// of these; dispatch is keyed on the tag, never on the raw string.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Alloc,
    Literal,
    Load,
    Store,
    Elem,
    Get,
    Call,
    Param,
    Define,
    Return,
    Jump,
    Cbranch,
    Label,
    Print,
    Read,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Not,
    Sitofp,
    Fptosi,
    Global,
}

impl Op {
    pub fn from_str(name: &str) -> Option<Op> {
        use Op::*;
        Some(match name {
            "alloc" => Alloc,
            "literal" => Literal,
            "load" => Load,
            "store" => Store,
            "elem" => Elem,
            "get" => Get,
            "call" => Call,
            "param" => Param,
            "define" => Define,
            "return" => Return,
            "jump" => Jump,
            "cbranch" => Cbranch,
            "label" => Label,
            "print" => Print,
            "read" => Read,
            "add" => Add,
            "sub" => Sub,
            "mul" => Mul,
            "div" => Div,
            "mod" => Mod,
            "lt" => Lt,
            "le" => Le,
            "gt" => Gt,
            "ge" => Ge,
            "eq" => Eq,
            "ne" => Ne,
            "and" => And,
            "or" => Or,
            "not" => Not,
            "sitofp" => Sitofp,
            "fptosi" => Fptosi,
            "global" => Global,
            _ => return None,
        })
    }

    // Operations whose opcode carries no type segment.
    fn is_bare(self) -> bool {
        use Op::*;
        match self {
            Fptosi | Sitofp | Label | Jump | Cbranch | Call => true,
            _ => false,
        }
    }
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeTag {
    Int,
    Float,
    Char,
    Bool,
    Void,
    Str,
}

impl TypeTag {
    pub fn from_str(name: &str) -> Option<TypeTag> {
        Some(match name {
            "int" => TypeTag::Int,
            "float" => TypeTag::Float,
            "char" => TypeTag::Char,
            "bool" => TypeTag::Bool,
            "void" => TypeTag::Void,
            "string" => TypeTag::Str,
            _ => return None,
        })
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Char => "char",
            TypeTag::Bool => "bool",
            TypeTag::Void => "void",
            TypeTag::Str => "string",
        };
        write!(f, "{}", name)
    }
}


// The dimension-and-indirection suffix of an opcode, reduced to the
// two numbers the handlers care about: total element count and
// pointer depth. A scalar opcode has no Shape at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Shape {
    pub elems: usize,
    pub depth: usize,
}


#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub op: Op,
    pub ty: Option<TypeTag>,
    pub shape: Option<Shape>,
}


// Split an opcode name into operation, type, and shape. Returns None
// for names that don't follow the opcode grammar; the dispatcher
// reports those and keeps running.
pub fn decode(opcode: &str) -> Option<Decoded> {
    let segs: Vec<&str> = opcode.split('_').collect();
    let op = Op::from_str(segs[0])?;

    if op.is_bare() {
        return Some(Decoded { op, ty: None, shape: None });
    }

    let ty = TypeTag::from_str(segs.get(1)?)?;

    let mut elems = 1;
    let mut depth = 0;
    let mut shaped = false;
    for seg in &segs[2..] {
        if *seg == "*" {
            depth += 1;
        } else if let Ok(n) = seg.parse::<usize>() {
            elems *= n;
        } else {
            return None;
        }
        shaped = true;
    }

    let shape = if shaped {
        Some(Shape { elems, depth })
    } else {
        None
    };
    Some(Decoded { op, ty: Some(ty), shape })
}


#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    // "@global", "%register", or a label reference.
    Name(String),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    // Global initializer; one level of nesting for 2-D arrays.
    List(Vec<Operand>),
    // The argument list of a define.
    Params(Vec<(TypeTag, String)>),
}

impl Operand {
    pub fn name(&self) -> Option<&str> {
        match self {
            Operand::Name(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Name(s) => write!(f, "{}", s),
            Operand::Int(v) => write!(f, "{}", v),
            Operand::Float(v) => write!(f, "{}", v),
            Operand::Char(c) => write!(f, "'{}'", c),
            Operand::Str(s) => write!(f, "{}", s),
            Operand::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Operand::Params(ps) => {
                for (i, (ty, name)) in ps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", ty, name)?;
                }
                Ok(())
            }
        }
    }
}


// One instruction tuple. Labels are instructions whose opcode ends in
// ':' and which carry no operands; return_void and print_void are the
// two other one-element forms.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub op: String,
    pub args: Vec<Operand>,
}

impl Instruction {
    pub fn new(op: &str, args: Vec<Operand>) -> Instruction {
        Instruction {
            op: op.to_string(),
            args,
        }
    }

    pub fn is_label(&self) -> bool {
        self.args.is_empty() && self.op.ends_with(':')
    }
}


// Render an instruction roughly the way the compiler's IR dumps look.
// Used by the debugger's list and view commands.
pub fn format_instruction(t: &Instruction) -> String {
    let segs: Vec<&str> = t.op.split('_').collect();
    let op = segs[0];

    let mut ty = String::new();
    if segs.len() > 1 {
        ty.push_str(segs[1]);
    }
    for qual in segs.iter().skip(2) {
        if *qual == "*" {
            ty.push('*');
        } else {
            ty.push_str(&format!(" [{}]", qual));
        }
    }

    let arg = |i: usize| match t.args.get(i) {
        Some(a) => a.to_string(),
        None => String::from("?"),
    };

    if !t.args.is_empty() {
        match op {
            "define" => format!("define {} {} {}", ty, arg(0), arg(1)),
            "global" => match t.args.get(1) {
                Some(init) if ty.starts_with("string") => {
                    format!("{} = global {} '{}'", arg(0), ty, init)
                }
                Some(init) => format!("{} = global {} {}", arg(0), ty, init),
                None => format!("{} = global {}", arg(0), ty),
            },
            "jump" => format!("  jump label {}", arg(0)),
            "cbranch" => format!("  cbranch {} label {} label {}", arg(0), arg(1), arg(2)),
            "return" => format!("  return {} {}", ty, arg(0)),
            "store" => {
                let mut s = format!("  store {} ", ty);
                for a in &t.args {
                    s.push_str(&format!("{} ", a));
                }
                s
            }
            _ => {
                let mut s = format!("  {} = {} {} ", arg(t.args.len() - 1), op, ty);
                for a in &t.args[..t.args.len() - 1] {
                    s.push_str(&format!("{} ", a));
                }
                s
            }
        }
    } else if ty == "void" {
        format!("  {}", op)
    } else {
        t.op.clone()
    }
}
