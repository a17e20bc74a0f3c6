//! Interactive and one-shot CLI commands.
//!
//! Everything here runs in the foreground: a single trigger, a chat on
//! stdin, or a local-model lifecycle action. Ctrl+C cancels the request
//! in flight instead of killing the process mid-clipboard-scope.

pub mod format;

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::app::AppContext;
use crate::conversation::ConversationSession;
use crate::dispatch::{CommandSet, Outcome};
use crate::error::PipelineError;
use crate::provider::ProviderClient;
use crate::provider::local::LocalModel;

/// Local model lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelAction {
    Status,
    Download,
    Delete,
    Retry,
}

/// One capture → dispatch → deliver cycle, continuing a conversation
/// result on stdin.
pub async fn once(
    app: &AppContext,
    command: &str,
    instruction: Option<&str>,
) -> Result<(), PipelineError> {
    let outcome = interruptible(
        app.trigger(command, instruction),
        tokio::signal::ctrl_c(),
        || app.cancel(),
    )
    .await?;
    if matches!(outcome, Outcome::Cancelled) {
        return Err(PipelineError::Cancelled);
    }
    format::print_outcome(&outcome);

    if let Outcome::Conversation(session) = outcome {
        eprintln!("Ask a follow-up, or /quit to finish.");
        converse(&session, BufReader::new(tokio::io::stdin())).await?;
    }
    Ok(())
}

/// Free-form chat with `provider`, optionally opened with `seed`.
pub async fn chat(provider: Arc<ProviderClient>, seed: Option<&str>) -> Result<(), PipelineError> {
    let session = ConversationSession::new(provider);
    eprintln!(
        "Chatting with {}. /history shows the transcript, /quit ends.",
        session.provider_kind()
    );
    if let Some(seed) = seed {
        eprintln!("> {seed}");
        ask(&session, seed).await?;
    }
    converse(&session, BufReader::new(tokio::io::stdin())).await
}

/// Read follow-ups from `input` until EOF or `/quit`.
///
/// A failed follow-up is reported and the chat goes on: the history is
/// unchanged by failures.
async fn converse<R>(session: &ConversationSession, input: R) -> Result<(), PipelineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        eprint!("> ");
        let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| PipelineError::Config(format!("stdin: {e}")))?
        else {
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => println!("{}", session.transcript()),
            question => match ask(session, question).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => eprintln!("Cancelled"),
                Err(e) => format::print_error(&e),
            },
        }
    }
    tracing::debug!(session = %session.id(), messages = session.len(), "conversation closed");
    Ok(())
}

/// Ask one question, streaming the answer to stdout as it arrives.
async fn ask(session: &ConversationSession, question: &str) -> Result<String, PipelineError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut printed = false;
        while let Some(chunk) = rx.recv().await {
            printed = true;
            let _ = stdout.write_all(chunk.as_bytes()).await;
            let _ = stdout.flush().await;
        }
        printed
    });

    let result = interruptible(
        session.ask(question, Some(&tx)),
        tokio::signal::ctrl_c(),
        || session.cancel(),
    )
    .await;
    drop(tx);
    let streamed = printer.await.unwrap_or(false);

    match &result {
        Ok(reply) if !streamed => println!("{reply}"),
        Ok(_) => println!(),
        Err(_) => {}
    }
    result
}

/// Drive `work` to completion. When `interrupt` fires first, `cancel`
/// runs and `work` is still awaited, so nothing it spawned keeps going
/// once this returns.
async fn interruptible<T>(
    work: impl Future<Output = Result<T, PipelineError>>,
    interrupt: impl Future,
    cancel: impl FnOnce(),
) -> Result<T, PipelineError> {
    tokio::pin!(work);
    tokio::select! {
        r = &mut work => r,
        _ = interrupt => {
            cancel();
            work.await
        }
    }
}

pub fn commands(commands: &CommandSet) {
    format::print_commands(commands);
}

/// Drive the local model through one lifecycle action.
pub async fn model(local: &LocalModel, action: ModelAction) -> Result<(), PipelineError> {
    match action {
        ModelAction::Status => format::print_model(&local.state(), local.files()),
        ModelAction::Delete => {
            local.delete().await?;
            eprintln!("Model files removed");
        }
        ModelAction::Download | ModelAction::Retry => {
            let cancel = CancellationToken::new();
            let mut states = local.subscribe();
            let watcher = tokio::spawn(async move {
                while states.changed().await.is_ok() {
                    let state = states.borrow_and_update().clone();
                    eprint!("\r\x1b[2K{state}");
                }
            });

            let work = async {
                if action == ModelAction::Retry {
                    local.retry(&cancel).await
                } else {
                    local.download(&cancel).await
                }
            };
            let result = interruptible(work, tokio::signal::ctrl_c(), || cancel.cancel()).await;
            watcher.abort();
            eprintln!();
            result?;
            format::print_model(&local.state(), local.files());
        }
    }
    Ok(())
}
