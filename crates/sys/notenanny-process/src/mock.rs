use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};

use crate::{CommandCancelled, CommandOutput, CommandRequest, Executor, exit_status_from_code};

/// Captured invocation. `script` holds the contents of the last argument
/// (the script or formatter input file) as it looked when the call was made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockRunCall {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub script: Option<String>,
    pub stdin: Option<Vec<u8>>,
}

impl MockRunCall {
    pub fn program_lossy(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// Scripted result for the next call.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Output {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Overwrite the file named by the last argument, then exit 0.
    Rewrite(String),
    TimedOut {
        stdout: String,
    },
    Cancelled,
    SpawnFailure(String),
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self::output(0, stdout, "")
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self::output(code, "", stderr)
    }

    pub fn output(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Output {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn rewrite(contents: impl Into<String>) -> Self {
        Self::Rewrite(contents.into())
    }

    pub fn timed_out(stdout: impl Into<String>) -> Self {
        Self::TimedOut {
            stdout: stdout.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::Cancelled
    }

    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self::SpawnFailure(message.into())
    }
}

/// Records every request and replays queued responses in order. When the
/// queue is empty the call succeeds with no output.
#[derive(Clone, Default)]
pub struct MockExecutor {
    runs: Rc<RefCell<Vec<MockRunCall>>>,
    responses: Rc<RefCell<VecDeque<MockResponse>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: MockResponse) -> &Self {
        self.responses.borrow_mut().push_back(response);
        self
    }

    pub fn recorded_runs(&self) -> Vec<MockRunCall> {
        self.runs.borrow().clone()
    }

    pub fn pending_responses(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Executor for MockExecutor {
    fn execute(&mut self, request: &CommandRequest) -> Result<CommandOutput> {
        let script = request
            .arguments()
            .last()
            .and_then(|path| fs::read_to_string(path).ok());
        let stdin = request
            .stdin_path()
            .map(|path| {
                fs::read(path).with_context(|| format!("mock stdin {}", path.display()))
            })
            .transpose()?;
        self.runs.borrow_mut().push(MockRunCall {
            program: request.program().to_os_string(),
            args: request.arguments().to_vec(),
            script,
            stdin,
        });

        let response = self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| MockResponse::success(""));
        match response {
            MockResponse::Output {
                code,
                stdout,
                stderr,
            } => Ok(CommandOutput {
                status: exit_status_from_code(code),
                stdout: stdout.into_bytes(),
                stderr: stderr.into_bytes(),
                timed_out: false,
            }),
            MockResponse::Rewrite(contents) => {
                let target = request
                    .arguments()
                    .last()
                    .ok_or_else(|| anyhow!("rewrite response needs a file argument"))?;
                fs::write(target, contents).context("mock rewrite")?;
                Ok(CommandOutput {
                    status: exit_status_from_code(0),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    timed_out: false,
                })
            }
            MockResponse::TimedOut { stdout } => Ok(CommandOutput {
                status: exit_status_from_code(137),
                stdout: stdout.into_bytes(),
                stderr: b"execution timed out after 60s\n".to_vec(),
                timed_out: true,
            }),
            MockResponse::Cancelled => Err(CommandCancelled.into()),
            MockResponse::SpawnFailure(message) => {
                Err(anyhow!(message)).with_context(|| format!("failed to spawn {}", request.render()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_cancelled;

    #[test]
    fn records_script_contents_and_replays_in_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let script = dir.path().join("a.py");
        fs::write(&script, "print(1)\n")?;

        let mut mock = MockExecutor::new();
        mock.push_response(MockResponse::success("1\n"))
            .push_response(MockResponse::cancelled());

        let mut request = CommandRequest::new("python3");
        request.arg(&script);
        let out = mock.execute(&request)?;
        assert_eq!(out.stdout_lossy(), "1\n");
        assert!(is_cancelled(&mock.execute(&request).unwrap_err()));
        let out = mock.execute(&request)?;
        assert!(out.success() && out.stdout.is_empty());

        let runs = mock.recorded_runs();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].program_lossy(), "python3");
        assert_eq!(runs[0].script.as_deref(), Some("print(1)\n"));
        Ok(())
    }

    #[test]
    fn rewrite_replaces_last_argument() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("code.swift");
        fs::write(&file, "let x=1\n")?;
        let mut mock = MockExecutor::new();
        mock.push_response(MockResponse::rewrite("let x = 1\n"));
        let mut request = CommandRequest::new("swiftformat");
        request.arg(&file);
        mock.execute(&request)?;
        assert_eq!(fs::read_to_string(&file)?, "let x = 1\n");
        Ok(())
    }
}
