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

use std::env::args;
use std::io::{stderr, stdin, stdout};
use std::process::exit;

use ucir::config;
use ucir::config::Config;
use ucir::parser;
use ucir::vm::{Engine, Io};


fn usage() -> ! {
    eprintln!("usage: ucir [-d|--debug] [--config <file>] <program>");
    exit(2);
}

fn main() {
    let mut debug = false;
    let mut config_path: Option<String> = None;
    let mut program: Option<String> = None;

    let mut argv = args().skip(1);
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-d" | "--debug" => debug = true,
            "--config" => match argv.next() {
                Some(path) => config_path = Some(path),
                None => usage(),
            },
            _ => program = Some(arg),
        }
    }
    let program = program.unwrap_or_else(|| usage());

    let mut config = match config_path {
        Some(path) => config::load(&path).unwrap_or_else(|e| {
            eprintln!("couldn't load config: {:?}", e);
            exit(2);
        }),
        None => Config::default(),
    };
    if debug {
        config.debug = true;
    }

    let code = parser::load(&program).unwrap_or_else(|e| {
        eprintln!("couldn't load program: {:?}", e);
        exit(2);
    });

    let stdin = stdin();
    let stdout = stdout();
    let stderr = stderr();
    let mut cin = stdin.lock();
    let mut cout = stdout.lock();
    let mut cerr = stderr.lock();
    let mut io = Io {
        cin: &mut cin,
        cout: &mut cout,
        cerr: &mut cerr,
    };

    let mut engine = Engine::new(code, config);
    match engine.run(&mut io) {
        Ok(status) => exit(status as i32),
        Err(e) => {
            eprintln!("fatal: {}", e);
            exit(1);
        }
    }
}
