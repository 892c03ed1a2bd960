use clap::Parser;
use dirs::home_dir;
use log::{debug, info};
use nu_ansi_term::{Color, Style};
use prog::{
    cli::{Args, Commands},
    error::{Error, Result},
    parse_source,
    repl::{REPLPrompt, REPLValidator, SyntaxHighlighter},
    Interpreter,
};
use reedline::{DefaultHinter, FileBackedHistory, Reedline, Signal};
use std::{
    env, fs,
    io::{self, IsTerminal},
    path::Path,
    process::ExitCode,
};

const BANNER: &str = r"
 ____  ____   ___   ____
|  _ \|  _ \ / _ \ / ___|
| |_) | |_) | | | | |  _
|  __/|  _ <| |_| | |_| |
|_|   |_| \_\\___/ \____|
";

fn use_color() -> bool {
    env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal()
}

fn paint(color: Color, text: &str) -> String {
    if use_color() {
        Style::new().bold().fg(color).paint(text).to_string()
    } else {
        text.to_string()
    }
}

fn report(err: &Error, path: Option<&Path>) {
    let (label, detail) = match err {
        Error::IO(io_err) => match path {
            Some(path) => (
                "Cannot open",
                format!("'{}': {}", path.display(), io_err),
            ),
            None => ("IO error", io_err.to_string()),
        },
        err if err.is_syntax() => ("Syntax error", located(err)),
        err => ("Runtime error", located(err)),
    };
    eprintln!("{} {}", paint(Color::Red, &format!("{}:", label)), detail);
}

fn located(err: &Error) -> String {
    match err.line() {
        Some(line) => format!("{} (line {})", err.message(), line),
        None => err.message(),
    }
}

fn read_source(path: &Path) -> Result<String> {
    debug!("reading {}", path.display());
    Ok(fs::read_to_string(path)?)
}

fn run_file(path: &Path) -> ExitCode {
    let result = read_source(path).map_err(|err| (err, Some(path))).and_then(|source| {
        Interpreter::new().exec(&source).map_err(|err| (err, None))
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err((err, path)) => {
            report(&err, path);
            ExitCode::FAILURE
        }
    }
}

fn check_file(path: &Path, print_ast: bool) -> ExitCode {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(err) => {
            report(&err, Some(path));
            return ExitCode::FAILURE;
        }
    };

    match parse_source(&source) {
        Ok(statements) => {
            if print_ast {
                println!("{:#?}", statements);
            }
            println!("{}: OK ({} statements)", path.display(), statements.len());
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err, None);
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!("{}", paint(Color::Cyan, BANNER));
    println!(
        "{} {}",
        paint(Color::Green, "PROG"),
        paint(Color::DarkGray, env!("CARGO_PKG_VERSION"))
    );
    println!("Type 'exit' or 'quit' to leave, 'run <path>' to load a file.\n");
}

fn run_repl() -> Result<()> {
    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(
            DefaultHinter::default().with_style(Style::new().italic().fg(Color::LightGray)),
        ))
        .with_highlighter(Box::new(SyntaxHighlighter))
        .with_validator(Box::new(REPLValidator));

    if let Some(history) = home_dir()
        .map(|home| home.join(".prog_history"))
        .and_then(|path| FileBackedHistory::with_file(100, path).ok())
        .map(Box::new)
    {
        line_editor = line_editor.with_history(history);
    } else {
        eprintln!("NOTE: Failed to load history. Persistence is now disabled.")
    }

    print_banner();

    let prompt = REPLPrompt;
    let mut interpreter = Interpreter::new();

    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(buffer) => {
                let input = buffer.trim();
                match input {
                    "" => continue,
                    "exit" | "quit" => break Ok(()),
                    _ => {}
                }

                if let Some(path) = input.strip_prefix("run ") {
                    let path = Path::new(path.trim());
                    match read_source(path) {
                        Ok(source) => {
                            if let Err(err) = interpreter.exec(&source) {
                                report(&err, None);
                            }
                        }
                        Err(err) => report(&err, Some(path)),
                    }
                    continue;
                }

                if let Err(err) = interpreter.exec(&buffer) {
                    report(&err, None);
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                break Ok(());
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let command = Args::parse().into_command();

    match command {
        Commands::Run { file } => {
            info!("FILE MODE");
            debug!("file: {:?}", file);
            run_file(&file)
        }
        Commands::Check { file, ast } => {
            info!("CHECK MODE");
            debug!("file: {:?}", file);
            check_file(&file, ast)
        }
        Commands::Repl => {
            info!("REPL MODE");
            match run_repl() {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    report(&err, None);
                    ExitCode::FAILURE
                }
            }
        }
    }
}
