use std::io::Write;

use pdbforensics::{
    config::ForensicsConfig,
    transport::{Request, USAGE, execute},
};
use rustyline::{DefaultEditor, Result, error::ReadlineError};
use tracing_subscriber::EnvFilter;

fn read_multiline_command(rl: &mut DefaultEditor) -> Result<String> {
    let mut input = String::new();
    let mut prompt = "pdb> ".to_string();

    loop {
        let line = rl.readline(&prompt)?;
        let trimmed_line = line.trim_end();

        // Trailing backslash continues the command on the next line
        if let Some(continued) = trimmed_line.strip_suffix('\\') {
            input.push_str(continued);
            input.push(' ');
            prompt = "  -> ".to_string();
        } else {
            input.push_str(trimmed_line);
            break;
        }
    }

    Ok(input)
}

/// Run one request and print its JSON response. Returns false on failure.
fn run_request(command: &str, config: &ForensicsConfig) -> bool {
    let outcome = Request::parse(command)
        .and_then(|request| execute(&request, config))
        .and_then(|response| response.to_json());
    match outcome {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            false
        }
    }
}

fn process_command(command: &str, config: &ForensicsConfig) -> bool {
    let cmd = command.trim();

    match cmd.to_lowercase().as_str() {
        "exit" | "quit" | "q" => {
            println!("Goodbye!");
            return false;
        }
        "help" | "h" => {
            println!(
                r#"
Available commands:
{}
  help, h          - Show this help message
  clear, ctrl + l  - Clear the screen
  exit, quit, q    - Exit

Scenarios are given by number (1-10) or region name.
Use '\' at the end of a line for multiline input.
Use Up/Down arrows to navigate command history.
"#,
                USAGE
            );
        }
        "clear" => {
            print!("\x1B[2J\x1B[1;1H");
            let _ = std::io::stdout().flush();
        }
        "" => {}
        _ => {
            run_request(cmd, config);
        }
    }

    true
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = match ForensicsConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {}; using defaults", err);
            ForensicsConfig::default()
        }
    };

    // A command on the command line runs once without the console
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        if !run_request(&args.join(" "), &config) {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!("pdbforensics: export.pdb corruption and recovery console. Type 'help' for commands.");

    let mut rl = DefaultEditor::new()?;
    let _ = rl.load_history(&config.history_file);

    loop {
        match read_multiline_command(&mut rl) {
            Ok(input) => {
                let command = input.trim().to_string();

                if !command.is_empty() {
                    rl.add_history_entry(&command)?;
                    if !process_command(&command, &config) {
                        break;
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("EOF");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Err(err) = rl.save_history(&config.history_file) {
        eprintln!("Could not save history: {}", err);
    }
    Ok(())
}
