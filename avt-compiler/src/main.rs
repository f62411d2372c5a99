// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! AVTransport packet specification compiler.

use argh::FromArgs;
use avt_compiler::backends::rust::{self as rust_backend, Unit};
use avt_compiler::{analyzer, ast, document, GeneratorConfig};
use codespan_reporting::term::{self, termcolor};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit code of command line usage errors (EINVAL).
const EXIT_USAGE: u8 = 22;
/// Exit code of specification errors (EX_DATAERR).
const EXIT_SPEC: u8 = 65;
const EXIT_IO: u8 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
enum OutputKind {
    Unit(Unit),
    /// JSON dump of the analyzed packet model.
    Ir,
}

impl std::str::FromStr for OutputKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "ir" | "json" => Ok(Self::Ir),
            unit => unit.parse().map(Self::Unit),
        }
    }
}

#[derive(FromArgs, Debug)]
/// AVTransport packet specification compiler.
///
/// Example: avtc enums,data,encode,decode spec.json enums.rs data.rs encode.rs decode.rs
struct Opt {
    #[argh(switch)]
    /// print tool version and exit.
    version: bool,

    #[argh(option, default = "32")]
    /// width in bits of the window packing sub-byte fields (8, 16, 32 or 64).
    bitfield_window: usize,

    #[argh(positional)]
    /// comma separated list of outputs (enums, data, encode, decode, ir),
    /// followed by the input specification document (JSON) and one
    /// output file per requested kind, in the same order.
    args: Vec<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Failure {
    Usage(String),
    /// Diagnostics were already printed.
    Spec,
    Io(String),
}

impl Failure {
    fn code(&self) -> u8 {
        match self {
            Failure::Usage(_) => EXIT_USAGE,
            Failure::Spec => EXIT_SPEC,
            Failure::Io(_) => EXIT_IO,
        }
    }
}

/// Validated command line request.
#[derive(Debug)]
struct Plan {
    config: GeneratorConfig,
    input_file: String,
    /// Outputs sorted in generation order.
    outputs: Vec<(OutputKind, String)>,
}

fn plan(opt: &Opt) -> Result<Plan, String> {
    let config = GeneratorConfig::with_bitfield_window(opt.bitfield_window)?;
    let (kinds, input_file, outputs) = match opt.args.as_slice() {
        [] => return Err("No output kinds are specified".to_owned()),
        [_] => return Err("No input file is specified".to_owned()),
        [kinds, input_file, outputs @ ..] => (kinds, input_file, outputs),
    };
    let kinds = kinds
        .split(',')
        .map(|kind| kind.trim().parse::<OutputKind>())
        .collect::<Result<Vec<_>, _>>()?;
    if kinds.len() != outputs.len() {
        return Err(format!(
            "{} output kinds are requested but {} output files are given",
            kinds.len(),
            outputs.len()
        ));
    }
    let mut outputs: Vec<_> = kinds.into_iter().zip(outputs.iter().cloned()).collect();
    outputs.sort_by_key(|(kind, _)| *kind);
    if let Some(pair) = outputs.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(format!("output kind {:?} is requested twice", pair[0].0));
    }
    Ok(Plan { config, input_file: input_file.clone(), outputs })
}

fn banner(input_file: &str) -> String {
    format!("// @generated by avtc {} from {}, do not edit.\n\n", env!("CARGO_PKG_VERSION"), input_file)
}

fn generate(file: &ast::File, kind: OutputKind, config: &GeneratorConfig) -> Result<String, Failure> {
    match kind {
        OutputKind::Ir => serde_json::to_string_pretty(file)
            .map(|json| json + "\n")
            .map_err(|err| Failure::Io(format!("failed to serialize the packet model: {}", err))),
        OutputKind::Unit(unit) => rust_backend::generate(file, unit, config)
            .map(|code| banner(&file.source) + &code)
            .map_err(|err| Failure::Io(format!("failed to format the {} unit: {}", unit.module_name(), err))),
    }
}

fn emit_failure(err: codespan_reporting::files::Error) -> Failure {
    Failure::Io(format!("could not emit diagnostics: {}", err))
}

fn run(opt: &Opt, stderr: &mut dyn termcolor::WriteColor) -> Result<(), Failure> {
    let plan = plan(opt).map_err(Failure::Usage)?;
    let source = std::fs::read_to_string(&plan.input_file)
        .map_err(|err| Failure::Io(format!("failed to read input file '{}': {}", plan.input_file, err)))?;

    let mut sources = ast::SourceDatabase::new();
    let doc = match document::parse_inline(&mut sources, &plan.input_file, source) {
        Ok(doc) => doc,
        Err(diagnostic) => {
            term::emit(stderr, &term::Config::default(), &sources, &diagnostic).map_err(emit_failure)?;
            return Err(Failure::Spec);
        }
    };
    let file = match analyzer::analyze(&doc, &plan.config, &plan.input_file) {
        Ok(file) => file,
        Err(diagnostics) => {
            diagnostics.emit(&sources, stderr).map_err(emit_failure)?;
            return Err(Failure::Spec);
        }
    };
    tracing::info!(
        input = %plan.input_file,
        structs = file.structs.len(),
        enums = file.enums.len(),
        descriptors = file.descriptors.len(),
        "analyzed specification"
    );

    for (kind, path) in &plan.outputs {
        let code = generate(&file, *kind, &plan.config)?;
        std::fs::write(path, code)
            .map_err(|err| Failure::Io(format!("failed to write output file '{}': {}", path, err)))?;
        tracing::debug!(?kind, path = %path, "wrote output");
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.first().map_or("avtc", String::as_str);
    let rest: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
    let opt = match Opt::from_args(&[command], &rest) {
        Ok(opt) => opt,
        Err(exit) if exit.status.is_ok() => {
            println!("{}", exit.output);
            return ExitCode::SUCCESS;
        }
        Err(exit) => {
            eprintln!("{}", exit.output);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if opt.version {
        println!("avtc {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let stderr = termcolor::StandardStream::stderr(termcolor::ColorChoice::Auto);
    let result = run(&opt, &mut stderr.lock());
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            match &failure {
                Failure::Usage(message) => eprintln!("error: {}\nRun avtc --help for more information.", message),
                Failure::Io(message) => eprintln!("error: {}", message),
                Failure::Spec => (),
            }
            ExitCode::from(failure.code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const SPEC: &str = r##"{
  "descriptors": [ { "codes": "'0x4242'", "anchor": "#session-start" } ],
  "structs": {
    "0x4242": [
      { "type": "u(16)", "name": "session_start_descriptor", "value": "0x4242" },
      { "type": "u(3)", "name": "a" },
      { "type": "u(2)", "name": "b" },
      { "type": "u(3)", "name": "c" }
    ]
  }
}"##;

    fn opt(kinds: &str, input_file: &Path, outputs: &[&Path]) -> Opt {
        let mut args = vec![kinds.to_owned(), input_file.to_string_lossy().into_owned()];
        args.extend(outputs.iter().map(|path| path.to_string_lossy().into_owned()));
        Opt { version: false, bitfield_window: 32, args }
    }

    fn run_quiet(opt: &Opt) -> (Result<(), Failure>, String) {
        let mut buffer = termcolor::Buffer::no_color();
        let result = run(opt, &mut buffer);
        (result, String::from_utf8_lossy(buffer.as_slice()).into_owned())
    }

    #[test]
    fn test_outputs_are_sorted() {
        let Ok(o) = Opt::from_args(&["avtc"], &["decode,enums", "spec.json", "decode.rs", "enums.rs"]) else {
            panic!("unexpected argument parsing failure");
        };
        let plan = plan(&o).unwrap();
        assert_eq!(plan.input_file, "spec.json");
        assert_eq!(
            plan.outputs,
            vec![
                (OutputKind::Unit(Unit::Enums), "enums.rs".to_owned()),
                (OutputKind::Unit(Unit::Decoder), "decode.rs".to_owned()),
            ]
        );
    }

    #[test]
    fn test_usage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("spec.json");
        let out = dir.path().join("out.rs");
        for (kinds, outputs) in [
            ("enums,data", vec![out.as_path()]),
            ("bindings", vec![out.as_path()]),
            ("enums,enums", vec![out.as_path(), out.as_path()]),
        ] {
            let (result, _) = run_quiet(&opt(kinds, &input, &outputs));
            assert!(matches!(result, Err(Failure::Usage(_))), "{kinds}: {result:?}");
            assert_eq!(Failure::Usage(String::new()).code(), 22);
        }
        let mut o = opt("enums", &input, &[out.as_path()]);
        o.bitfield_window = 12;
        assert!(matches!(run_quiet(&o).0, Err(Failure::Usage(_))));
        o.args.truncate(1);
        assert_eq!(plan(&o).err(), Some("invalid bit field window 12, expected one of [8, 16, 32, 64]".to_owned()));
        o.bitfield_window = 8;
        assert_eq!(plan(&o).err(), Some("No input file is specified".to_owned()));
    }

    #[test]
    fn test_generate_all_units() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("spec.json");
        std::fs::write(&input, SPEC).unwrap();
        let names = ["encode.rs", "enums.rs", "ir.json", "data.rs", "decode.rs"];
        let outputs: Vec<_> = names.iter().map(|name| dir.path().join(name)).collect();
        let paths: Vec<&Path> = outputs.iter().map(|p| p.as_path()).collect();

        let (result, _) = run_quiet(&opt("encode,enums,ir,data-structs,decoder", &input, &paths));
        assert_eq!(result, Ok(()));

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert!(read("enums.rs").starts_with("// @generated by avtc"));
        assert!(read("enums.rs").contains("pub const SESSION_START: PktDescriptor"));
        assert!(read("data.rs").contains("pub struct SessionStart"));
        assert!(read("encode.rs").contains("impl Encode for SessionStart"));
        assert!(read("decode.rs").contains("impl Decode for SessionStart"));
        let ir: serde_json::Value = serde_json::from_str(&read("ir.json")).unwrap();
        assert_eq!(ir["structs"][0]["id"], "SessionStart");
        assert_eq!(ir["structs"][0]["size_bits"], 24);
    }

    #[test]
    fn test_spec_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("spec.json");
        std::fs::write(&input, SPEC.replace("u(3)", "x(3)")).unwrap();
        let out = dir.path().join("enums.rs");
        let (result, stderr) = run_quiet(&opt("enums", &input, &[out.as_path()]));
        assert_eq!(result, Err(Failure::Spec));
        assert!(stderr.contains("E1"), "{stderr}");
        assert!(!out.exists());
        assert_eq!(Failure::Spec.code(), 65);
    }

    #[test]
    fn test_emission_failures_are_io_errors() {
        let failure = emit_failure(codespan_reporting::files::Error::FileMissing);
        assert!(matches!(&failure, Failure::Io(message) if message.starts_with("could not emit diagnostics")));
        assert_eq!(failure.code(), 1);
    }

    #[test]
    fn test_missing_input_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("enums.rs");
        let (result, _) = run_quiet(&opt("enums", &dir.path().join("missing.json"), &[out.as_path()]));
        assert!(matches!(result, Err(Failure::Io(_))));
    }
}
