use std::time::Duration;
use std::{env, fs, path::Path};

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use vvc::bytecode::disassemble;
use vvc::lang::ModuleMap;
use vvc::{Context, Program};

fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let timeout = match flag_value(&args, "--timeout") {
        Some(secs) => match parse_timeout(secs) {
            Some(timeout) => Some(timeout),
            None => {
                eprintln!("Error: --timeout expects a positive number of seconds, got {}", secs);
                std::process::exit(1);
            }
        },
        None => None,
    };

    // positional arguments, skipping flag values
    let mut positional = Vec::new();
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        if arg == "--timeout" {
            rest.next();
        } else if !arg.starts_with('-') {
            positional.push(arg.as_str());
        }
    }

    match positional.as_slice() {
        ["disasm", filename] => cmd_disasm(filename),
        ["run", filename] => cmd_run(filename, timeout),
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr, filtered by `VVC_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("VVC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

/// Positive seconds that fit in a `Duration`.
fn parse_timeout(secs: &str) -> Option<Duration> {
    let secs = secs.parse::<f64>().ok().filter(|s| *s > 0.0)?;
    Duration::try_from_secs_f64(secs).ok()
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let at = args.iter().position(|a| a == flag)?;
    args.get(at + 1).map(String::as_str)
}

fn print_usage() {
    println!("VVC - compiled script artifacts");
    println!();
    println!("Usage:");
    println!("  vvc disasm <file.vvc>                 Print the bytecode listing");
    println!("  vvc run <file.vvc> [--timeout SECS]   Run and print the globals");
    println!("  vvc --help, -h                        Show this help");
    println!();
    println!("Set VVC_LOG (e.g. VVC_LOG=vvc=debug) for diagnostics.");
}

fn load(filename: &str) -> Program {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("vvc") {
        eprintln!("Error: expected a .vvc file, got {}", filename);
        std::process::exit(1);
    }
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };
    match Program::unmarshal(&bytes, &ModuleMap::new()) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("Cannot load '{}': {}", filename, e);
            std::process::exit(1);
        }
    }
}

fn cmd_disasm(filename: &str) {
    let program = load(filename);
    print!("{}", disassemble(&program.bytecode()));
}

fn cmd_run(filename: &str, timeout: Option<Duration>) {
    let program = load(filename);
    let result = match timeout {
        Some(t) => program.run_context(&Context::background().with_timeout(t)),
        None => program.run(),
    };
    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    for var in program.get_all() {
        println!("{} = {}", var.name(), var.value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("1.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_timeout("0"), None);
        assert_eq!(parse_timeout("-2"), None);
        assert_eq!(parse_timeout("abc"), None);
        assert_eq!(parse_timeout("1e30"), None);
        assert_eq!(parse_timeout("inf"), None);
        assert_eq!(parse_timeout("NaN"), None);
    }
}
