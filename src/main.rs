//! upyterm - serial terminal and script runner for MicroPython boards
//!
//! # Quick Start
//!
//! ```text
//! upyterm ports                      # List serial devices
//! upyterm -p /dev/ttyUSB0            # Interactive terminal (Ctrl+] exits)
//! upyterm -p /dev/ttyUSB0 run foo.py # Run a script, print its output
//! upyterm -p /dev/ttyUSB0 ls         # List files on the board
//! ```

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use upyterm::config::{self, Config};
use upyterm::core::chain::{Worker, WorkerError};
use upyterm::core::exec::strip_completion_marker;
use upyterm::core::port::available_ports;
use upyterm::core::session::Session;
use upyterm::ui::KeyMapper;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Ports,
    Term,
    Run(PathBuf),
    Ls,
    Help,
    Version,
}

/// Command line, before merging with the config file
#[derive(Debug, Clone, PartialEq)]
struct CliArgs {
    command: Command,
    port: Option<String>,
    baud_rate: Option<u32>,
    timeout_secs: Option<u64>,
}

fn print_help() {
    eprintln!("upyterm {} - Serial terminal for MicroPython boards", VERSION);
    eprintln!();
    eprintln!("Usage: upyterm [OPTIONS] [COMMAND]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  term (default)        Interactive terminal, Ctrl+] to exit");
    eprintln!("  run <FILE>            Run a script on the board and print its output");
    eprintln!("  ls                    List files on the board");
    eprintln!("  ports                 List serial ports");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -p, --port <PORT>     Serial device (default: `port` from config)");
    eprintln!("  -b, --baud <RATE>     Baud rate (default: 115200)");
    eprintln!("  -t, --timeout <SECS>  Script timeout, 0 waits forever (default: 10)");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.upyterm/config.toml");
    eprintln!("Log file:      ~/.upyterm/upyterm.log");
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs {
        command: Command::Term,
        port: None,
        baud_rate: None,
        timeout_secs: None,
    };
    let mut command: Option<Command> = None;
    let mut i = 0;

    fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
        args.get(i)
            .map(String::as_str)
            .ok_or_else(|| format!("Missing argument for {}", flag))
    }

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-h" | "--help" => return Ok(CliArgs { command: Command::Help, ..cli }),
            "-v" | "--version" => return Ok(CliArgs { command: Command::Version, ..cli }),
            "-p" | "--port" => {
                i += 1;
                cli.port = Some(value(args, i, arg)?.to_string());
            }
            "-b" | "--baud" => {
                i += 1;
                let raw = value(args, i, arg)?;
                cli.baud_rate = Some(raw.parse().map_err(|_| format!("Invalid baud rate: {}", raw))?);
            }
            "-t" | "--timeout" => {
                i += 1;
                let raw = value(args, i, arg)?;
                cli.timeout_secs = Some(raw.parse().map_err(|_| format!("Invalid timeout: {}", raw))?);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            _ if command.is_some() => {
                return Err(format!("Unexpected argument: {}", arg));
            }
            "ports" => command = Some(Command::Ports),
            "term" => command = Some(Command::Term),
            "ls" => command = Some(Command::Ls),
            "run" => {
                i += 1;
                command = Some(Command::Run(PathBuf::from(value(args, i, arg)?)));
            }
            _ => return Err(format!("Unknown command: {}. Use -h for help.", arg)),
        }
        i += 1;
    }

    if let Some(command) = command {
        cli.command = command;
    }
    Ok(cli)
}

/// Command line flags take precedence over the config file
fn merge(mut config: Config, cli: &CliArgs) -> Config {
    if let Some(port) = &cli.port {
        config.port = Some(port.clone());
    }
    if let Some(baud_rate) = cli.baud_rate {
        config.baud_rate = baud_rate;
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        config.exec.timeout_secs = timeout_secs;
    }
    config
}

fn init_logging(config: &Config) {
    let log_path = config::app_dir()
        .map(|dir| dir.join("upyterm.log"))
        .unwrap_or_else(|| PathBuf::from("upyterm.log"));

    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            eprintln!("upyterm {}", VERSION);
            return Ok(());
        }
        _ => {}
    }

    let loaded = Config::try_load();
    let file_config = loaded.as_ref().cloned().unwrap_or_default();
    init_logging(&file_config);
    info!("upyterm {} starting...", VERSION);
    if let Err(e) = &loaded {
        warn!("{}; using defaults", e);
        eprintln!("Warning: {}; using defaults", e);
    }
    let config = merge(file_config, &cli);

    match &cli.command {
        Command::Ports => list_ports(),
        Command::Term => run_terminal(&config),
        Command::Run(path) => run_script(&config, path),
        Command::Ls => list_files(&config),
        Command::Help | Command::Version => Ok(()),
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        eprintln!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

/// Session opened on the configured port
fn connect(config: &Config) -> anyhow::Result<Session> {
    let port = config
        .port
        .clone()
        .ok_or_else(|| anyhow!("No serial port given; use --port or set `port` in ~/.upyterm/config.toml"))?;

    let session = Session::from_config(config);
    session.open(&port, config.baud_rate).map_err(|e| {
        error!("{}", e);
        e
    })?;
    Ok(session)
}

/// Script stdout and stderr from raw-prompt output (`OK<out>\x04<err>\x04`)
fn split_raw_output(captured: &[u8]) -> (String, String) {
    let body = strip_completion_marker(captured);
    let body = body.strip_prefix(b"OK").unwrap_or(body);

    let mut parts = body.splitn(3, |&b| b == 0x04);
    let stdout = parts.next().unwrap_or_default();
    let stderr = parts.next().unwrap_or_default();

    // The clear-screen statement sent ahead of the script prints first
    let stdout = stdout.strip_prefix(b"\x1bc\r\n").unwrap_or(stdout);
    (
        String::from_utf8_lossy(stdout).into_owned(),
        String::from_utf8_lossy(stderr).into_owned(),
    )
}

fn run_script(config: &Config, path: &Path) -> anyhow::Result<()> {
    let script = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let session = connect(config)?;

    info!("Running {}", path.display());
    let captured = session.exec().run_blocking(&script, config.exec_options())?;
    let (stdout, stderr) = split_raw_output(&captured);

    print!("{}", stdout);
    io::stdout().flush()?;
    if !stderr.is_empty() {
        eprint!("{}", stderr);
        bail!("{} raised an exception", path.display());
    }
    Ok(())
}

fn list_files(config: &Config) -> anyhow::Result<()> {
    let session = connect(config)?;
    for name in session.exec().list_dir(config.exec_options())? {
        println!("{}", name);
    }
    Ok(())
}

/// Copies device output to the host terminal
struct StdoutEcho;

impl Worker for StdoutEcho {
    fn name(&self) -> &str {
        "stdout"
    }

    fn offer(&mut self, chunk: &[u8]) -> Result<bool, WorkerError> {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(chunk)
            .and_then(|_| stdout.flush())
            .map_err(|e| WorkerError::Failed(e.to_string()))?;
        Ok(false)
    }

    fn is_permanent(&self) -> bool {
        true
    }
}

/// Ctrl+]. Unix terminals report the raw 0x1D byte as Ctrl+5.
fn is_exit_key(key: &KeyEvent) -> bool {
    matches!(key.code, KeyCode::Char(']') | KeyCode::Char('5'))
        && key.modifiers.contains(KeyModifiers::CONTROL)
}

fn run_terminal(config: &Config) -> anyhow::Result<()> {
    let session = connect(config)?;
    session.transport().register_worker(Box::new(StdoutEcho));

    if let Ok((cols, rows)) = terminal::size() {
        info!("Terminal size: {}x{}", cols, rows);
        session.screen().resize(rows, cols);
    }

    eprintln!(
        "Connected to {} at {} baud. Ctrl+] to exit.\r",
        session.port_name().unwrap_or_default(),
        config.baud_rate
    );

    terminal::enable_raw_mode()?;
    let result = run_main_loop(&session);
    let _ = terminal::disable_raw_mode();

    session.close();
    eprintln!();
    result
}

fn run_main_loop(session: &Session) -> anyhow::Result<()> {
    let poll_timeout = Duration::from_millis(20);

    loop {
        if event::poll(poll_timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if is_exit_key(&key) {
                        info!("Exit requested");
                        break;
                    }
                    if let Some(bytes) = KeyMapper::from_event(&key) {
                        session.write(&bytes)?;
                    }
                }
                Event::Resize(cols, rows) => session.screen().resize(rows, cols),
                _ => {}
            }
        }

        session.process_events();
        if !session.is_open() {
            error!("Connection lost");
            bail!("Connection to the device was lost");
        }
    }
    Ok(())
}
