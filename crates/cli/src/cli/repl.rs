//! `jupyter-interpreter repl`: readline loop against one session.
//!
//! A line ending in `:` opens a block that runs once an empty line is
//! entered, so `def`/`for`/`with` bodies can be typed naturally.

use ji_domain::config::Config;
use ji_sessions::ExecuteResponse;

pub async fn repl(config: &Config, session: Option<String>) -> anyhow::Result<()> {
    let registry = super::exec::connect(config).await?;

    // Provision up front so the id is known before the first prompt.
    let resolved = registry.resolve(session.as_deref()).await?;
    let session_id = resolved.session_id.clone();
    drop(resolved);

    let mut rl = rustyline::DefaultEditor::new()?;

    eprintln!("jupyter-interpreter repl");
    eprintln!("Session: {session_id}  |  /exit or Ctrl+D to quit, /history to list");
    eprintln!();

    let mut block: Vec<String> = Vec::new();
    loop {
        let prompt = if block.is_empty() { ">>> " } else { "... " };
        match rl.readline(prompt) {
            Ok(line) => {
                if block.is_empty() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(&line).ok();

                    match trimmed {
                        "/exit" | "/quit" => break,
                        "/session" => {
                            println!("{session_id}");
                            continue;
                        }
                        "/history" => {
                            print_history(&registry, &session_id).await;
                            continue;
                        }
                        _ => {}
                    }

                    if trimmed.ends_with(':') {
                        block.push(line);
                        continue;
                    }
                    let response = registry.execute(Some(session_id.as_str()), &line).await;
                    print_response(&response);
                } else if line.trim().is_empty() {
                    let code = block.join("\n");
                    block.clear();
                    let response = registry.execute(Some(session_id.as_str()), &code).await;
                    print_response(&response);
                } else {
                    rl.add_history_entry(&line).ok();
                    block.push(line);
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                block.clear();
                eprintln!("(Use Ctrl+D or /exit to quit)");
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    registry.close_all().await;
    eprintln!("Session {session_id} saved. Resume with --session {session_id}");
    Ok(())
}

fn print_response(response: &ExecuteResponse) {
    for output in &response.outcome.outputs {
        if output.ends_with('\n') {
            print!("{output}");
        } else {
            println!("{output}");
        }
    }
    for error in &response.outcome.errors {
        eprintln!("\x1B[31m{error}\x1B[0m");
    }
}

async fn print_history(registry: &ji_sessions::SessionRegistry, session_id: &str) {
    let Some(session) = registry.get(session_id) else {
        return;
    };
    let session = session.lock().await;
    for (i, entry) in session.history().iter().enumerate() {
        println!("[{}] {}", i + 1, entry);
    }
}
