use std::io::{self, Write};

use lawvina_chat::{ChatMode, ChatSession, Citation, Role, lock_store};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::transcript::{
    StreamPrinter, render_conversation_list, render_document, render_message,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Ask { text: String },
    New,
    List,
    Switch { index: usize },
    Delete { index: Option<usize> },
    Open { index: usize },
    Mode { mode: ChatMode },
    Help,
    Quit,
    Invalid { message: String },
}

pub struct ReplCommandParser;

impl ReplCommandParser {
    pub fn parse(input: &str) -> Option<ReplCommand> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !trimmed.starts_with('/') {
            return Some(ReplCommand::Ask {
                text: trimmed.to_string(),
            });
        }

        let (name, argument) = match trimmed.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (trimmed, ""),
        };
        let command = match name {
            "/new" => ReplCommand::New,
            "/list" => ReplCommand::List,
            "/switch" => match parse_index(argument) {
                Some(index) => ReplCommand::Switch { index },
                None => invalid("usage: /switch <n>"),
            },
            "/delete" if argument.is_empty() => ReplCommand::Delete { index: None },
            "/delete" => match parse_index(argument) {
                Some(index) => ReplCommand::Delete { index: Some(index) },
                None => invalid("usage: /delete [n]"),
            },
            "/open" => match parse_index(argument) {
                Some(index) => ReplCommand::Open { index },
                None => invalid("usage: /open <n>"),
            },
            "/mode" => match ChatMode::parse(argument) {
                Some(mode) => ReplCommand::Mode { mode },
                None => invalid("usage: /mode <law_db|web|hybrid>"),
            },
            "/help" => ReplCommand::Help,
            "/quit" | "/exit" => ReplCommand::Quit,
            _ => invalid(&format!("unknown command {name}, try /help")),
        };
        Some(command)
    }
}

/// One-based list position to zero-based index.
fn parse_index(argument: &str) -> Option<usize> {
    argument
        .parse::<usize>()
        .ok()
        .filter(|index| *index > 0)
        .map(|index| index - 1)
}

fn invalid(message: &str) -> ReplCommand {
    ReplCommand::Invalid {
        message: message.to_string(),
    }
}

pub async fn run_repl(session: &mut ChatSession) -> Result<(), String> {
    println!(
        "LawVina ({}, mode {})",
        session.client().config().base_url,
        session.mode().as_str()
    );
    println!("commands: /new, /list, /switch <n>, /delete [n], /open <n>, /mode <m>, /help, /quit");
    print_active_transcript(session);
    print_advisory(session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("lawvina> ");
        io::stdout()
            .flush()
            .map_err(|error| format!("stdout flush failed: {error}"))?;

        let Some(line) = lines
            .next_line()
            .await
            .map_err(|error| format!("stdin read failed: {error}"))?
        else {
            println!();
            return Ok(());
        };
        let Some(command) = ReplCommandParser::parse(&line) else {
            continue;
        };

        match command {
            ReplCommand::Ask { text } => {
                if let Err(error) = ask(session, &text).await {
                    eprintln!("send failed: {error}");
                }
            }
            ReplCommand::New => {
                lock_store(session.store()).create_conversation();
                print_active_transcript(session);
            }
            ReplCommand::List => {
                let store = lock_store(session.store());
                print!(
                    "{}",
                    render_conversation_list(store.conversations(), store.active_id())
                );
            }
            ReplCommand::Switch { index } => {
                let selected = {
                    let mut store = lock_store(session.store());
                    let id = store
                        .conversations()
                        .get(index)
                        .map(|conversation| conversation.id.clone());
                    id.is_some_and(|id| store.select_conversation(&id))
                };
                if selected {
                    print_active_transcript(session);
                } else {
                    eprintln!("no conversation #{}", index + 1);
                }
            }
            ReplCommand::Delete { index } => {
                let deleted = {
                    let mut store = lock_store(session.store());
                    let id = match index {
                        Some(index) => store
                            .conversations()
                            .get(index)
                            .map(|conversation| conversation.id.clone()),
                        None => store.active_id().map(str::to_string),
                    };
                    id.is_some_and(|id| store.delete_conversation(&id))
                };
                if deleted {
                    println!("conversation deleted");
                    print_active_transcript(session);
                } else {
                    eprintln!("nothing to delete");
                }
            }
            ReplCommand::Open { index } => {
                let Some(citation) = latest_citation(session, index) else {
                    eprintln!("no citation #{} in the latest reply", index + 1);
                    continue;
                };
                match session.client().get_document(&citation.id).await {
                    Ok(document) => print!("{}", render_document(&document)),
                    Err(error) => eprintln!("open failed: {error}"),
                }
            }
            ReplCommand::Mode { mode } => {
                session.set_mode(mode);
                println!("mode: {}", mode.as_str());
            }
            ReplCommand::Help => print_help(),
            ReplCommand::Quit => return Ok(()),
            ReplCommand::Invalid { message } => eprintln!("{message}"),
        }
        print_advisory(session);
    }
}

async fn ask(session: &ChatSession, text: &str) -> Result<(), String> {
    let conversation_id = lock_store(session.store())
        .active_id()
        .map(str::to_string)
        .ok_or_else(|| "no active conversation".to_string())?;
    let mut exchange = session
        .send(&conversation_id, text)
        .map_err(|error| error.to_string())?;

    let mut printer = StreamPrinter::new(io::stdout());
    while let Some(update) = exchange.next().await {
        printer.on_update(&update)?;
    }
    Ok(())
}

fn latest_citation(session: &ChatSession, index: usize) -> Option<Citation> {
    let store = lock_store(session.store());
    let reply = store
        .active()?
        .messages
        .iter()
        .rev()
        .find(|message| message.role == Role::Assistant && !message.citations().is_empty())?;
    reply.citations().get(index).cloned()
}

fn print_active_transcript(session: &ChatSession) {
    let store = lock_store(session.store());
    let Some(conversation) = store.active() else {
        return;
    };
    println!("== {} ==", conversation.title);
    for message in &conversation.messages {
        print!("{}", render_message(message));
    }
}

fn print_advisory(session: &ChatSession) {
    if let Some(advisory) = lock_store(session.store()).take_advisory() {
        eprintln!("warning: {advisory}");
    }
}

fn print_help() {
    println!("commands:");
    println!("  /new           start a new conversation");
    println!("  /list          list conversations (* marks the active one)");
    println!("  /switch <n>    switch to conversation n");
    println!("  /delete [n]    delete conversation n, or the active one");
    println!("  /open <n>      show cited document n of the latest reply");
    println!("  /mode <m>      answer from law_db, web or hybrid sources");
    println!("  /help          show this help");
    println!("  /quit          quit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_questions() {
        assert_eq!(
            ReplCommandParser::parse("  Thuế thu nhập cá nhân? \n"),
            Some(ReplCommand::Ask {
                text: "Thuế thu nhập cá nhân?".to_string()
            })
        );
        assert_eq!(ReplCommandParser::parse("   "), None);
    }

    #[test]
    fn list_positions_are_one_based() {
        assert_eq!(
            ReplCommandParser::parse("/switch 2"),
            Some(ReplCommand::Switch { index: 1 })
        );
        assert_eq!(
            ReplCommandParser::parse("/open 1"),
            Some(ReplCommand::Open { index: 0 })
        );
        assert!(matches!(
            ReplCommandParser::parse("/switch 0"),
            Some(ReplCommand::Invalid { .. })
        ));
    }

    #[test]
    fn delete_defaults_to_the_active_conversation() {
        assert_eq!(
            ReplCommandParser::parse("/delete"),
            Some(ReplCommand::Delete { index: None })
        );
        assert_eq!(
            ReplCommandParser::parse("/delete 3"),
            Some(ReplCommand::Delete { index: Some(2) })
        );
    }

    #[test]
    fn mode_accepts_known_modes_only() {
        assert_eq!(
            ReplCommandParser::parse("/mode LAW_DB"),
            Some(ReplCommand::Mode {
                mode: ChatMode::LawDb
            })
        );
        assert!(matches!(
            ReplCommandParser::parse("/mode oracle"),
            Some(ReplCommand::Invalid { .. })
        ));
    }

    #[test]
    fn unknown_slash_commands_are_reported() {
        assert_eq!(ReplCommandParser::parse("/exit"), Some(ReplCommand::Quit));
        assert!(matches!(
            ReplCommandParser::parse("/resume"),
            Some(ReplCommand::Invalid { message }) if message.contains("/resume")
        ));
    }
}
