//! Line commands read from stdin while watching a case.

use serde_json::{Map, Value};

use casesync_core::{CaseResolution, FormData, StartMessage, TaskId};

#[derive(Debug, Clone, PartialEq)]
pub enum LineCommand {
    Open(TaskId),
    Close,
    Submit(FormData),
    Start(StartMessage),
    Cancel(TaskId),
    CloseCase(CaseResolution),
    Refresh,
    Stop,
    Resume,
    List,
    Status,
    Help,
    Quit,
}

impl LineCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "open" => Self::Open(TaskId::new(required(rest, "open <task>")?)),
            "close" => Self::Close,
            "submit" => Self::Submit(if rest.is_empty() {
                FormData::new()
            } else {
                object(rest)?
            }),
            "start" => {
                let (name, vars) = match rest.split_once(char::is_whitespace) {
                    Some((name, vars)) => (name, vars.trim()),
                    None => (required(rest, "start <message> [json]")?, ""),
                };
                let mut message = StartMessage::new(name);
                if !vars.is_empty() {
                    message.variables = object(vars)?;
                }
                Self::Start(message)
            }
            "cancel" => Self::Cancel(TaskId::new(required(rest, "cancel <task>")?)),
            "close-case" => {
                let (outcome, comment) = match rest.split_once(char::is_whitespace) {
                    Some((outcome, comment)) => (outcome, comment.trim()),
                    None => (required(rest, "close-case <outcome> [comment]")?, ""),
                };
                let mut resolution = CaseResolution::new(outcome);
                if !comment.is_empty() {
                    resolution = resolution.with_comment(comment);
                }
                Self::CloseCase(resolution)
            }
            "refresh" => Self::Refresh,
            "stop" => Self::Stop,
            "resume" => Self::Resume,
            "list" | "ls" => Self::List,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}', try 'help'")),
        };
        Ok(Some(command))
    }
}

pub const HELP: &str = "\
commands:
  open <task>                    open a task form
  close                          discard the open form
  submit [json]                  submit the open form
  start <message> [json]         send a start-message
  cancel <task>                  cancel a task
  close-case <outcome> [comment] close the case
  refresh                        fetch the task list now
  stop | resume                  stop or restart polling
  list                           show the current tasks
  status                         show the polling status
  quit                           leave";

fn required<'a>(value: &'a str, usage: &str) -> Result<&'a str, String> {
    if value.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(value)
    }
}

fn object(json: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}
