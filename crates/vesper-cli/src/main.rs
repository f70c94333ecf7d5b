use std::{env, fs, process::ExitCode};

use vesper::{RingTracer, Runner, StdPrint};

fn main() -> ExitCode {
    let mut path: Option<String> = None;
    let mut debug = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--debug" => debug = true,
            other if path.is_none() => path = Some(other.to_owned()),
            other => {
                eprintln!("error: unexpected argument `{other}`");
                return ExitCode::FAILURE;
            }
        }
    }
    let Some(path) = path else {
        eprintln!("usage: vesper <script.vsp> [--debug]");
        return ExitCode::FAILURE;
    };

    let code = match read_file(&path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let runner = match Runner::new(&code, &path) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if debug {
        let mut tracer = RingTracer::default();
        match runner.run_traced(&mut StdPrint, &mut tracer) {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                eprintln!("recent debug log:");
                for event in tracer.events() {
                    eprintln!("  {event}");
                }
                ExitCode::FAILURE
            }
        }
    } else {
        match runner.run(&mut StdPrint) {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        }
    }
}

fn read_file(path: &str) -> Result<String, String> {
    match fs::metadata(path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("{path} is not a file"));
            }
        }
        Err(err) => return Err(format!("cannot read {path}: {err}")),
    }
    fs::read_to_string(path).map_err(|err| format!("cannot read {path}: {err}"))
}
