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
// The interactive single-step debugger (idb). The engine hands over
// control before each fetch; the prompt loop reads commands from the
// engine's input channel until one of them resumes execution. `go`
// installs a breakpoint: the engine calls back here only once the
// program counter matches it.

use std::io::{BufRead, Write};

use crate::ir::format_instruction;
use crate::vm::{Binding, Engine, Error, Io, Result};


// Show the window around the current instruction, then prompt.
// Returns the breakpoint to run to, or None to stop at the next
// instruction.
pub(crate) fn pause(engine: &mut Engine, io: &mut Io) -> Result<Option<usize>> {
    let pos = engine.pc;
    view(engine, io, pos)?;
    prompt(engine, io)
}

fn prompt(engine: &mut Engine, io: &mut Io) -> Result<Option<usize>> {
    loop {
        write!(io.cout, "idb> ")?;
        io.cout.flush()?;

        let mut line = String::new();
        if io.cin.read_line(&mut line)? == 0 {
            // No terminal left to drive us.
            return Err(Error::Exit(0));
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        match words[0] {
            "s" | "step" => return Ok(None),
            "g" | "go" => match words.get(1).and_then(|w| w.parse::<usize>().ok()) {
                Some(pc) => return Ok(Some(pc)),
                None => writeln!(io.cout, "unrecognized command")?,
            },
            "e" | "ex" => examine(engine, io, &words[1..])?,
            "l" | "list" => {
                if words.len() == 3 {
                    match (words[1].parse(), words[2].parse()) {
                        (Ok(start), Ok(end)) => list(engine, io, start, end)?,
                        _ => writeln!(io.cout, "unrecognized command")?,
                    }
                } else {
                    list(engine, io, 0, engine.lastpc)?;
                }
            }
            "v" | "view" => {
                let pos = engine.pc;
                view(engine, io, pos)?;
            }
            "r" | "run" => {
                engine.debug = false;
                return Ok(None);
            }
            "q" | "quit" => return Err(Error::Exit(0)),
            "h" | "help" => show_help(io)?,
            cmd => writeln!(io.cout, "{} : unrecognized command", cmd)?,
        }
    }
}

pub fn show_help(io: &mut Io) -> Result<()> {
    writeln!(
        io.cout,
        "  s, step: run in step mode;\n\
         \x20 g, go <pc>: goto the program counter;\n\
         \x20 l, list {{<start> <end>}}? : list the ir code;\n\
         \x20 e, ex {{<vars>}}+ : examine the variables;\n\
         \x20 v, view : show the current line of execution;\n\
         \x20 r, run : run (terminate) the program in normal mode;\n\
         \x20 q, quit : quit (abort) the program;\n\
         \x20 h, help: print this text."
    )?;
    Ok(())
}

fn list(engine: &Engine, io: &mut Io, start: usize, end: usize) -> Result<()> {
    for i in start..end.min(engine.lastpc) {
        writeln!(io.cout, "{}:    {}", i, format_instruction(&engine.code[i]))?;
    }
    Ok(())
}

fn view(engine: &Engine, io: &mut Io, pos: usize) -> Result<()> {
    let init = pos.saturating_sub(2);
    let end = (pos + 3).min(engine.lastpc);
    for i in init..end {
        let mark = if i == pos { ": >> " } else { ":    " };
        writeln!(io.cout, "{}{}{}", i, mark, format_instruction(&engine.code[i]))?;
    }
    writeln!(io.cout)?;
    Ok(())
}

fn examine(engine: &Engine, io: &mut Io, names: &[&str]) -> Result<()> {
    for name in names {
        if name.starts_with('%') {
            match engine.vars.get(*name) {
                Some(Binding::Cell(at)) => {
                    writeln!(io.cout, "{} : {:?}", name, engine.mem.read(*at)?)?
                }
                Some(Binding::Label(pc)) => writeln!(io.cout, "{} : label {}", name, pc)?,
                None => writeln!(io.cout, "{}: unrecognized var or temp", name)?,
            }
        } else if name.starts_with('@') {
            match engine.globals.get(*name) {
                Some(at) => writeln!(io.cout, "{} : {:?}", name, engine.mem.read(*at)?)?,
                None => writeln!(io.cout, "{}: unrecognized var or temp", name)?,
            }
        } else {
            writeln!(io.cout, "{}: unrecognized var or temp", name)?;
        }
    }
    Ok(())
}
