//! Interactive shell
//!
//! The shell is the live bookmark view. It mounts an [`App`], renders every
//! published view snapshot, and turns typed lines into [`Command`]s.
//!
//! Readline blocks, so it runs on a blocking thread and forwards commands
//! to the view loop over a channel:
//!
//! ```text
//! readline thread --Command--> App::run --ViewState--> render task
//! ```
//!
//! The render task prints through rustyline's external printer, so a new
//! view appears above the prompt instead of inside the line being typed.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, ExternalPrinter};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::app::{App, AppOptions, Command};
use crate::backend::Backend;
use crate::error::Result;
use crate::render;
use crate::sync::ViewState;

const PROMPT: &str = "smartmark> ";

/// Errors from parsing a shell line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType 'help' to see available commands")]
    UnknownCommand(String),

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },

    /// `#n` does not name a listed bookmark
    #[error("There is no bookmark #{0} in the list")]
    NoSuchPosition(usize),
}

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellInput {
    /// Forward to the view loop
    Command(Command),
    /// Print help locally
    Help,
    /// Blank line
    Empty,
}

/// Parses one line against the current view.
///
/// `delete #n` resolves the 1-based list position to an id using `view`.
///
/// # Examples
///
/// ```
/// use smartmark::app::Command;
/// use smartmark::commands::shell::{parse_shell_command, ShellInput};
/// use smartmark::sync::ViewState;
///
/// let view = ViewState::default();
/// let input = parse_shell_command("add Rust Book https://doc.rust-lang.org/book", &view);
/// assert_eq!(
///     input,
///     Ok(ShellInput::Command(Command::Add {
///         title: "Rust Book".to_string(),
///         url: "https://doc.rust-lang.org/book".to_string(),
///     }))
/// );
/// ```
pub fn parse_shell_command(
    line: &str,
    view: &ViewState,
) -> std::result::Result<ShellInput, ShellError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ShellInput::Empty);
    }

    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (trimmed, ""),
    };

    match head.to_lowercase().as_str() {
        "add" => {
            let Some((title, url)) = rest.rsplit_once(char::is_whitespace) else {
                return Err(ShellError::MissingArgument {
                    command: "add".to_string(),
                    usage: "add <title> <url>".to_string(),
                });
            };
            Ok(ShellInput::Command(Command::Add {
                title: title.trim().to_string(),
                url: url.to_string(),
            }))
        }
        "delete" | "del" | "rm" => {
            if rest.is_empty() {
                return Err(ShellError::MissingArgument {
                    command: "delete".to_string(),
                    usage: "delete <id | #n>".to_string(),
                });
            }
            let id = match rest.strip_prefix('#').map(str::parse::<usize>) {
                Some(Ok(position)) => view
                    .bookmark_at(position)
                    .map(|b| b.id.clone())
                    .ok_or(ShellError::NoSuchPosition(position))?,
                _ => rest.to_string(),
            };
            Ok(ShellInput::Command(Command::Delete(id)))
        }
        "refresh" | "r" => Ok(ShellInput::Command(Command::Refresh)),
        "login" => {
            let provider = (!rest.is_empty()).then(|| rest.to_string());
            Ok(ShellInput::Command(Command::SignIn(provider)))
        }
        "logout" => Ok(ShellInput::Command(Command::SignOut)),
        "help" | "?" => Ok(ShellInput::Help),
        "quit" | "exit" | "q" => Ok(ShellInput::Command(Command::Quit)),
        _ => Err(ShellError::UnknownCommand(head.to_string())),
    }
}

/// Runs the interactive shell until `quit`, Ctrl-C or Ctrl-D.
pub async fn run_shell(backend: Backend, options: AppOptions) -> Result<()> {
    tracing::info!("Starting interactive shell");

    let app = App::new(backend, options);
    let view = app.view();
    let (tx, rx) = mpsc::channel::<Command>(16);
    let (printer_tx, printer_rx) = oneshot::channel();

    let renderer = tokio::spawn(render_loop(view.clone(), printer_rx));
    let reader = tokio::task::spawn_blocking(move || read_loop(tx, view, printer_tx));

    let outcome = app.run(rx).await;

    renderer.abort();
    // The reader ends on its own once the command channel is closed and
    // the next line is entered.
    drop(reader);

    println!("Goodbye!");
    outcome
}

/// Prints above the readline prompt so typed input is not broken up.
type Printer = Box<dyn ExternalPrinter + Send>;

/// Writes `text` through the printer, or straight to stdout without one.
fn emit(printer: &mut Option<Printer>, text: String) {
    if let Some(p) = printer.as_mut() {
        match p.print(text.clone()) {
            Ok(()) => return,
            Err(e) => {
                tracing::debug!(error = %e, "External printer failed; using stdout");
                *printer = None;
            }
        }
    }
    print!("{text}");
}

async fn render_loop(
    mut view: watch::Receiver<ViewState>,
    printer: oneshot::Receiver<Option<Printer>>,
) {
    let mut printer = printer.await.ok().flatten();
    let first = format!("\n{}", render::render_view(&view.borrow_and_update()));
    emit(&mut printer, first);
    while view.changed().await.is_ok() {
        let snapshot = view.borrow_and_update().clone();
        emit(&mut printer, format!("\n{}", render::render_view(&snapshot)));
    }
}

fn read_loop(
    tx: mpsc::Sender<Command>,
    view: watch::Receiver<ViewState>,
    printer: oneshot::Sender<Option<Printer>>,
) {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            tracing::error!("Readline error: {:?}", e);
            let _ = printer.send(None);
            let _ = tx.blocking_send(Command::Quit);
            return;
        }
    };

    println!("{}", render::shell_help().dimmed());

    let external = match rl.create_external_printer() {
        Ok(p) => Some(Box::new(p) as Printer),
        Err(e) => {
            tracing::debug!(error = %e, "No external printer; views print directly");
            None
        }
    };
    let _ = printer.send(external);

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.as_str());
                }
                let parsed = parse_shell_command(&line, &view.borrow());
                match parsed {
                    Ok(ShellInput::Command(command)) => {
                        let quit = command == Command::Quit;
                        if tx.blocking_send(command).is_err() || quit {
                            break;
                        }
                    }
                    Ok(ShellInput::Help) => println!("{}", render::shell_help()),
                    Ok(ShellInput::Empty) => {}
                    Err(e) => eprintln!("{}", e.to_string().red()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                let _ = tx.blocking_send(Command::Quit);
                break;
            }
            Err(err) => {
                tracing::error!("Readline error: {:?}", err);
                let _ = tx.blocking_send(Command::Quit);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Bookmark, Session, User};
    use chrono::DateTime;

    fn view_with(ids: &[&str]) -> ViewState {
        let mut view = ViewState::default();
        view.set_session(Some(Session {
            access_token: "t".to_string(),
            token_type: "bearer".to_string(),
            refresh_token: None,
            expires_at: None,
            user: User {
                id: "u1".to_string(),
                email: None,
            },
        }));
        let rows = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Bookmark {
                id: id.to_string(),
                title: id.to_string(),
                url: format!("https://example.com/{id}"),
                user_id: "u1".to_string(),
                created_at: DateTime::from_timestamp(1_700_000_000 - i as i64, 0).unwrap(),
            })
            .collect();
        view.replace_all(rows);
        view
    }

    fn parse(line: &str) -> std::result::Result<ShellInput, ShellError> {
        parse_shell_command(line, &ViewState::default())
    }

    #[test]
    fn test_parse_add_uses_last_word_as_url() {
        assert_eq!(
            parse("add  The Rust Book   https://doc.rust-lang.org/book "),
            Ok(ShellInput::Command(Command::Add {
                title: "The Rust Book".to_string(),
                url: "https://doc.rust-lang.org/book".to_string(),
            }))
        );
    }

    #[test]
    fn test_parse_add_without_url_is_missing_argument() {
        assert!(matches!(
            parse("add onlytitle"),
            Err(ShellError::MissingArgument { .. })
        ));
        assert!(matches!(parse("add"), Err(ShellError::MissingArgument { .. })));
    }

    #[test]
    fn test_parse_delete_by_id() {
        assert_eq!(
            parse("delete 3f2a"),
            Ok(ShellInput::Command(Command::Delete("3f2a".to_string())))
        );
    }

    #[test]
    fn test_parse_delete_by_position() {
        let view = view_with(&["newest", "older"]);
        assert_eq!(
            parse_shell_command("delete #2", &view),
            Ok(ShellInput::Command(Command::Delete("older".to_string())))
        );
        assert_eq!(
            parse_shell_command("rm #3", &view),
            Err(ShellError::NoSuchPosition(3))
        );
    }

    #[test]
    fn test_parse_login_with_and_without_provider() {
        assert_eq!(
            parse("login"),
            Ok(ShellInput::Command(Command::SignIn(None)))
        );
        assert_eq!(
            parse("login github"),
            Ok(ShellInput::Command(Command::SignIn(Some(
                "github".to_string()
            ))))
        );
    }

    #[test]
    fn test_parse_simple_commands_case_insensitive() {
        assert_eq!(parse("REFRESH"), Ok(ShellInput::Command(Command::Refresh)));
        assert_eq!(parse("logout"), Ok(ShellInput::Command(Command::SignOut)));
        assert_eq!(parse("Quit"), Ok(ShellInput::Command(Command::Quit)));
        assert_eq!(parse("help"), Ok(ShellInput::Help));
        assert_eq!(parse("   "), Ok(ShellInput::Empty));
    }

    #[derive(Clone, Default)]
    struct Recording(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

    impl ExternalPrinter for Recording {
        fn print(&mut self, msg: String) -> rustyline::Result<()> {
            self.0.lock().unwrap().push(msg);
            Ok(())
        }
    }

    struct Broken;

    impl ExternalPrinter for Broken {
        fn print(&mut self, _msg: String) -> rustyline::Result<()> {
            Err(ReadlineError::Interrupted)
        }
    }

    #[test]
    fn test_emit_goes_through_printer() {
        let recording = Recording::default();
        let mut printer: Option<Printer> = Some(Box::new(recording.clone()));
        emit(&mut printer, "view".to_string());
        assert_eq!(*recording.0.lock().unwrap(), vec!["view".to_string()]);
        assert!(printer.is_some());
    }

    #[test]
    fn test_emit_drops_failing_printer() {
        let mut printer: Option<Printer> = Some(Box::new(Broken));
        emit(&mut printer, "view".to_string());
        assert!(printer.is_none());
    }

    #[tokio::test]
    async fn test_render_loop_prints_each_snapshot_above_prompt() {
        let (state, view) = watch::channel(ViewState::default());
        let (printer_tx, printer_rx) = oneshot::channel::<Option<Printer>>();
        let recording = Recording::default();
        let task = tokio::spawn(render_loop(view, printer_rx));
        assert!(printer_tx.send(Some(Box::new(recording.clone()))).is_ok());

        let printed = |n: usize| {
            let recording = recording.clone();
            async move {
                while recording.0.lock().unwrap().len() < n {
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), printed(1))
            .await
            .unwrap();
        state.send_replace(view_with(&["a"]));
        tokio::time::timeout(std::time::Duration::from_secs(5), printed(2))
            .await
            .unwrap();
        task.abort();

        let messages = recording.0.lock().unwrap().clone();
        assert!(messages[0].contains(render::SIGN_IN_PROMPT));
        assert!(messages[1].contains("example.com/a"));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(
            parse("bogus arg"),
            Err(ShellError::UnknownCommand("bogus".to_string()))
        );
    }
}
