mod disassembler;
mod logger;
mod output;

use clap::{Arg, ArgAction, ArgMatches, Command};
use docbridge_core::{
    Bridge, BridgeConfig, BridgeError, BridgeResult, DocModule, ErrorKind, HlirModule, generate_error_report,
    lower_hlir_to_doc,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use output::FormatStyle;

fn main() -> ExitCode {
    let cli = Command::new("docbridge")
        .version("0.1.0")
        .about("Lower HLIR modules to DOC payloads through the hlir_ffi C ABI");

    let cli = setup_cli(cli);
    let matches = cli.get_matches();
    logger::init(matches.get_count("verbose"));

    let style = FormatStyle::default();
    match dispatch_commands(&matches, &style) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style.error_line(&e.to_string()));
            log::debug!("{}", generate_error_report(&e));
            ExitCode::from(e.code().clamp(1, 255) as u8)
        }
    }
}

/// Sets up the CLI with subcommands and arguments.
fn setup_cli(cli: Command) -> Command {
    cli.arg(
        Arg::new("verbose")
            .help("Increase log output (repeat for more)")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .global(true),
    )
    .subcommand(
        Command::new("lower")
            .about("Lower an HLIR module (JSON) and write the serialized DOC payload")
            .arg(
                Arg::new("file")
                    .help("The HLIR module to lower")
                    .required(true)
                    .index(1),
            )
            .arg(
                Arg::new("output")
                    .help("Specify the output file (defaults to the input with a .doc extension)")
                    .short('o')
                    .long("output")
                    .value_parser(clap::value_parser!(String))
                    .value_name("FILE"),
            )
            .arg(config_arg())
            .arg(
                Arg::new("library")
                    .help("Load the lowering library from this path instead of the linked copy")
                    .long("library")
                    .value_parser(clap::value_parser!(String))
                    .value_name("PATH"),
            ),
    )
    .subcommand(
        Command::new("dump")
            .about("Disassemble a serialized DOC payload")
            .arg(
                Arg::new("file")
                    .help("The .doc file to read")
                    .required(true)
                    .index(1),
            ),
    )
    .subcommand(
        Command::new("info")
            .about("Summarize an HLIR module and its lowered form")
            .arg(
                Arg::new("file")
                    .help("The HLIR module to inspect")
                    .required(true)
                    .index(1),
            )
            .arg(config_arg()),
    )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .help("Lowering config (JSON); defaults to $HLIR_BRIDGE_CONFIG or built-in defaults")
        .short('c')
        .long("config")
        .value_parser(clap::value_parser!(String))
        .value_name("FILE")
}

/// Dispatches the command based on the parsed arguments.
fn dispatch_commands(matches: &ArgMatches, style: &FormatStyle) -> BridgeResult<()> {
    match matches.subcommand() {
        Some(("lower", sub_m)) => {
            let file = required(sub_m, "file")?;
            let module = read_module(file)?;
            let config = read_config(sub_m)?;

            let bridge = match sub_m.get_one::<String>("library") {
                Some(path) => Bridge::load(Path::new(path))?,
                None => Bridge::linked(hlir_ffi::linked_api())?,
            };
            let session = bridge.open_session(&config)?;
            let bytes = session.lower_to_doc(&module)?;

            let out = match sub_m.get_one::<String>("output") {
                Some(o) => PathBuf::from(o),
                None => Path::new(file).with_extension("doc"),
            };
            fs::write(&out, &bytes).map_err(|e| {
                BridgeError::with_issuer(
                    ErrorKind::SerializationFailure,
                    format!("write {}: {}", out.display(), e),
                    "docbridge.cli",
                )
            })?;
            println!(
                "{}",
                style.success_line(&format!("{} -> {} ({} bytes)", file, out.display(), bytes.len()))
            );
            Ok(())
        }
        Some(("dump", sub_m)) => {
            let file = required(sub_m, "file")?;
            let bytes = fs::read(file).map_err(|e| BridgeError::invalid_input(format!("read {}: {}", file, e)))?;
            print!("{}", disassembler::disassemble(&bytes)?);
            Ok(())
        }
        Some(("info", sub_m)) => {
            let file = required(sub_m, "file")?;
            let module = read_module(file)?;
            let config = read_config(sub_m)?;
            let program = lower_hlir_to_doc(&module, &config)?;
            let doc = DocModule::from_program(&program, config.max_output_bytes);

            println!("{}", style.title.apply_to(format!("module '{}'", module.name)));
            println!("{}", output::summary_table(&module, &doc.summary(), doc.payload().len()));
            if let Err(e) = doc.serializable_bytes() {
                println!("{}", style.info.apply_to(format!("note: {}", e)));
            }
            Ok(())
        }
        _ => Err(BridgeError::invalid_input(
            "No valid subcommand was used. Use --help for more information.",
        )),
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> BridgeResult<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| BridgeError::invalid_input(format!("missing argument '{}'", name)))
}

fn read_module(file: &str) -> BridgeResult<HlirModule> {
    let raw = fs::read_to_string(file).map_err(|e| BridgeError::invalid_input(format!("read {}: {}", file, e)))?;
    HlirModule::from_json_str(&raw)
}

fn read_config(matches: &ArgMatches) -> BridgeResult<BridgeConfig> {
    match matches.get_one::<String>("config") {
        Some(path) => BridgeConfig::load_from_file(path),
        None => Ok(BridgeConfig::from_env()),
    }
}
