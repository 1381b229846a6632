//! Terminal shell for the Goldfinch assistant core.
//!
//! A minimal stand-in for the dashboard's chat surface: it wires the HTTP
//! backend client and file-backed session storage into an [`Assistant`] and
//! drives it from stdin. One slash-command per controller operation.

use anyhow::Result;
use goldfinch::api::HttpChatApi;
use goldfinch::session::{Assistant, CONVERSATION_PAGE};
use goldfinch::storage::FileStore;
use goldfinch::types::Role;
use std::io::{BufRead, Write};
use std::sync::Arc;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const MESSAGE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour repr:12 padding:zero]:[minute padding:zero] [period case:upper]");

fn load_dotenv() {
    // Environment wins over the .env file; a missing file is fine.
    let _ = dotenvy::dotenv();
}

fn format_timestamp(mut datetime: OffsetDateTime) -> Option<String> {
    if let Ok(offset) = UtcOffset::current_local_offset() {
        datetime = datetime.to_offset(offset);
    }
    datetime.format(MESSAGE_TIME_FORMAT).ok()
}

fn print_tab_state(assistant: &Assistant) {
    let Some(tab) = assistant.active_tab() else {
        println!("(no open tabs - use /new)");
        return;
    };
    let Some(state) = assistant.tab_state(&tab.id) else {
        return;
    };

    println!("== {} ==", tab.title);
    for msg in &state.messages {
        let speaker = match msg.role {
            Role::User => "you",
            Role::Assistant => "goldfinch",
        };
        match format_timestamp(msg.created_at) {
            Some(ts) => println!("[{ts}] {speaker}: {}", msg.content),
            None => println!("{speaker}: {}", msg.content),
        }
        for action in &msg.actions_executed {
            let status = if action.success { "ok" } else { "failed" };
            println!("    ({} {})", action.action, status);
        }
    }
    if let Some(error) = &state.error {
        println!("error: {error}");
    }
}

fn print_reply(assistant: &Assistant, tab_id: &str) {
    let Some(state) = assistant.tab_state(tab_id) else {
        return;
    };
    if let Some(error) = &state.error {
        println!("error: {error}");
        return;
    }
    if let Some(reply) = state
        .messages
        .iter()
        .rev()
        .find(|msg| msg.role == Role::Assistant)
    {
        println!("goldfinch: {}", reply.content);
    }
}

fn print_help() {
    println!("commands:");
    println!("  /tabs            list open tabs");
    println!("  /tab <n>         switch to tab n");
    println!("  /new             open a new tab");
    println!("  /close           close the active tab");
    println!("  /list            list recent conversations");
    println!("  /open <n>        open conversation n from the list");
    println!("  /rename <title>  rename the active conversation");
    println!("  /delete          delete the active conversation");
    println!("  /history         reprint the active tab");
    println!("  /quit            exit");
    println!("anything else is sent as a message.");
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt::init();

    let api = Arc::new(HttpChatApi::from_env()?);
    let storage = Arc::new(FileStore::new(FileStore::default_dir()));
    let assistant = Assistant::new(api, storage);

    assistant.hydrate().await;
    assistant.refresh_conversations(CONVERSATION_PAGE).await;

    print_help();
    print_tab_state(&assistant);

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" => break,
            "/help" => print_help(),
            "/tabs" => {
                let active = assistant.active_tab().map(|tab| tab.id);
                for (index, tab) in assistant.tabs_snapshot().iter().enumerate() {
                    let marker = if Some(&tab.id) == active.as_ref() { "*" } else { " " };
                    println!("{marker} {index}: {}", tab.title);
                }
            }
            "/tab" => match rest.parse::<usize>().ok().and_then(|index| {
                assistant.tabs_snapshot().get(index).map(|tab| tab.id.clone())
            }) {
                Some(tab_id) => {
                    assistant.select_tab(&tab_id).await;
                    print_tab_state(&assistant);
                }
                None => println!("no such tab"),
            },
            "/new" => {
                assistant.create_tab();
                print_tab_state(&assistant);
            }
            "/close" => {
                if let Some(tab) = assistant.active_tab() {
                    assistant.close_tab(&tab.id).await;
                }
                print_tab_state(&assistant);
            }
            "/list" => {
                assistant.refresh_conversations(CONVERSATION_PAGE).await;
                for (index, conversation) in assistant.conversations().iter().enumerate() {
                    println!("{index}: {}", conversation.title);
                }
            }
            "/open" => {
                let target = rest.parse::<usize>().ok().and_then(|index| {
                    assistant
                        .conversations()
                        .get(index)
                        .map(|c| (c.id.clone(), c.title.clone()))
                });
                match target {
                    Some((conversation_id, title)) => {
                        assistant.open_conversation(&conversation_id, &title).await;
                        print_tab_state(&assistant);
                    }
                    None => println!("no such conversation"),
                }
            }
            "/rename" if !rest.is_empty() => {
                if let Some(tab) = assistant.active_tab() {
                    assistant.rename_conversation(&tab.id, rest).await;
                }
            }
            "/delete" => {
                if let Some(conversation_id) = assistant.current_conversation() {
                    match assistant.delete_conversation(&conversation_id).await {
                        Ok(()) => println!("conversation deleted"),
                        Err(err) => println!("delete failed: {err}"),
                    }
                } else {
                    println!("active tab has no conversation");
                }
            }
            "/history" => print_tab_state(&assistant),
            _ => {
                let tab_id = match assistant.active_tab() {
                    Some(tab) => tab.id,
                    None => assistant.create_tab(),
                };
                assistant.set_draft(&tab_id, line);
                assistant.send(&tab_id, None).await;
                print_reply(&assistant, &tab_id);
            }
        }
    }

    Ok(())
}
