//! Output and input surface shared by the conversation loop and the
//! interactive server callbacks.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Line(String),
    /// Ctrl-C while waiting for input, or during the turn that preceded it.
    Interrupted,
    /// End of input.
    Closed,
}

#[async_trait]
pub trait Interaction: Send + Sync {
    fn assistant(&self, text: &str);

    fn info(&self, text: &str);

    fn warning(&self, text: &str);

    async fn read_line(&self, prompt: &str) -> UserInput;
}

struct Waiter {
    prompt: String,
    reply: oneshot::Sender<UserInput>,
}

#[derive(Default)]
struct BrokerState {
    /// Pending reads; the most recent one is served first.
    waiters: Vec<Waiter>,
    typed_ahead: VecDeque<String>,
    interrupted: bool,
    closed: bool,
}

type PromptWriter = Box<dyn Fn(&str) + Send + Sync>;

/// Single owner of user input.
///
/// Lines go to the innermost pending read. A server callback that prompts
/// while the REPL is waiting takes the next line, then the REPL prompt is
/// shown again. Lines and Ctrl-C that arrive with no read pending are kept
/// for the next read.
pub struct LineBroker {
    state: Mutex<BrokerState>,
    show_prompt: PromptWriter,
}

impl LineBroker {
    /// Serves lines from `lines` until the sender side closes.
    pub fn spawn(
        mut lines: mpsc::UnboundedReceiver<String>,
        show_prompt: impl Fn(&str) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let broker = Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
            show_prompt: Box::new(show_prompt),
        });
        let feeder = broker.clone();
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                feeder.deliver(UserInput::Line(line)).await;
            }
            feeder.close().await;
        });
        broker
    }

    pub async fn interrupt(&self) {
        self.deliver(UserInput::Interrupted).await;
    }

    pub async fn read_line(&self, prompt: &str) -> UserInput {
        let reply = {
            let mut state = self.state.lock().await;
            if std::mem::take(&mut state.interrupted) {
                return UserInput::Interrupted;
            }
            if let Some(line) = state.typed_ahead.pop_front() {
                (self.show_prompt)(prompt);
                return UserInput::Line(line);
            }
            if state.closed {
                return UserInput::Closed;
            }
            if state.waiters.is_empty() {
                (self.show_prompt)(prompt);
            } else {
                (self.show_prompt)(&format!("\n{prompt}"));
            }
            let (reply, receiver) = oneshot::channel();
            state.waiters.push(Waiter {
                prompt: prompt.to_string(),
                reply,
            });
            receiver
        };
        reply.await.unwrap_or(UserInput::Closed)
    }

    async fn deliver(&self, mut input: UserInput) {
        let mut state = self.state.lock().await;
        while let Some(waiter) = state.waiters.pop() {
            match waiter.reply.send(input) {
                Ok(()) => {
                    if let Some(outer) = state.waiters.last() {
                        (self.show_prompt)(&outer.prompt);
                    }
                    return;
                }
                // The read was cancelled; offer the input to the next one.
                Err(returned) => input = returned,
            }
        }
        match input {
            UserInput::Line(line) => state.typed_ahead.push_back(line),
            UserInput::Interrupted => {
                debug!("Interrupt recorded for the next prompt");
                state.interrupted = true;
            }
            UserInput::Closed => state.closed = true,
        }
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.reply.send(UserInput::Closed);
        }
    }
}

/// Interaction over the process stdin/stdout.
///
/// Stdin is read on a dedicated thread. Ctrl-C while a read is pending
/// answers that read with [`UserInput::Interrupted`]. Ctrl-C during a turn
/// does not cancel the turn; it is answered at the next prompt, which ends
/// the REPL or declines the next server callback.
pub struct TerminalInteraction {
    input: Arc<LineBroker>,
}

impl TerminalInteraction {
    /// Must be called within a Tokio runtime.
    pub fn new() -> Self {
        let input = LineBroker::spawn(spawn_stdin_reader(), |prompt| {
            print!("{prompt}");
            let _ = std::io::stdout().flush();
        });
        let interrupts = input.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                println!();
                interrupts.interrupt().await;
            }
        });
        Self { input }
    }
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Failed to read from stdin");
                        break;
                    }
                }
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, "Failed to start stdin reader");
    }
    rx
}

#[async_trait]
impl Interaction for TerminalInteraction {
    fn assistant(&self, text: &str) {
        println!("\nAssistant: {text}\n");
    }

    fn info(&self, text: &str) {
        println!("{text}");
    }

    fn warning(&self, text: &str) {
        eprintln!("warning: {text}");
    }

    async fn read_line(&self, prompt: &str) -> UserInput {
        self.input.read_line(prompt).await
    }
}
