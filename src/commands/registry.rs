#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Help,
    Tools,
    Servers,
    History,
    Exclude,
    Resources,
    Resource,
    Prompts,
    Prompt,
    Quit,
}

pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub kind: CommandKind,
}

#[derive(Clone, Copy)]
pub struct CommandInvocation<'a> {
    pub input: &'a str,
    pub args: &'a str,
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

pub fn find_command(name: &str) -> Option<&'static Command> {
    all_commands()
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

/// Commands whose name starts with `prefix`, for completion hints.
pub fn matching_commands(prefix: &str) -> Vec<&'static Command> {
    let prefix = prefix.to_ascii_lowercase();
    all_commands()
        .iter()
        .filter(|command| command.name.starts_with(&prefix))
        .collect()
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        usage: "/help",
        help: "Show available commands.",
        kind: CommandKind::Help,
    },
    Command {
        name: "tools",
        usage: "/tools",
        help: "List active tools by server, then excluded tools.",
        kind: CommandKind::Tools,
    },
    Command {
        name: "servers",
        usage: "/servers",
        help: "Show connected servers, their transport, state and capabilities.",
        kind: CommandKind::Servers,
    },
    Command {
        name: "history",
        usage: "/history",
        help: "Print the conversation history.",
        kind: CommandKind::History,
    },
    Command {
        name: "exclude",
        usage: "/exclude <suffix>",
        help: "Stop offering tools whose qualified name ends with <suffix>.",
        kind: CommandKind::Exclude,
    },
    Command {
        name: "resources",
        usage: "/resources",
        help: "List resources offered by every server.",
        kind: CommandKind::Resources,
    },
    Command {
        name: "resource",
        usage: "/resource <uri | server__uri>",
        help: "Fetch a resource and print its contents.",
        kind: CommandKind::Resource,
    },
    Command {
        name: "prompts",
        usage: "/prompts",
        help: "List prompt templates and their arguments.",
        kind: CommandKind::Prompts,
    },
    Command {
        name: "prompt",
        usage: "/prompt <server__name> [key=value ...]",
        help: "Fill in a prompt template and send it to the model.",
        kind: CommandKind::Prompt,
    },
    Command {
        name: "quit",
        usage: "/quit",
        help: "Leave the session (also `quit` or `exit`).",
        kind: CommandKind::Quit,
    },
];
