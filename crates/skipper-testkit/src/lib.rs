//! Test doubles shared across the workspace: a scripted oracle and
//! temp-workspace helpers.

use skipper_core::OracleMessage;
use skipper_llm::{Oracle, OracleError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

/// Oracle that replays a fixed script of responses in order. Every
/// request's messages are recorded for assertions; running past the end
/// of the script returns an empty plan (`"[]"`).
pub struct MockOracle {
    responses: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<Vec<OracleMessage>>>,
}

impl MockOracle {
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Number of completions requested so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    /// The user-role content of request `n`, for prompt assertions.
    #[must_use]
    pub fn user_content_of(&self, n: usize) -> Option<String> {
        self.requests.borrow().get(n).map(|messages| {
            messages
                .iter()
                .filter(|m| matches!(m.role, skipper_core::Role::User))
                .map(|m| m.content.clone())
                .collect::<Vec<_>>()
                .join("\n")
        })
    }
}

impl Oracle for MockOracle {
    fn complete(&self, messages: &[OracleMessage]) -> Result<String, OracleError> {
        self.requests.borrow_mut().push(messages.to_vec());
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| "[]".to_string()))
    }
}

/// Oracle that always proposes the same single step. Used to pin
/// budget-exhaustion behavior.
pub struct EndlessOracle {
    step_json: String,
    requests: RefCell<usize>,
}

impl EndlessOracle {
    pub fn new(step_json: impl Into<String>) -> Self {
        Self {
            step_json: step_json.into(),
            requests: RefCell::new(0),
        }
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        *self.requests.borrow()
    }
}

impl Oracle for EndlessOracle {
    fn complete(&self, _messages: &[OracleMessage]) -> Result<String, OracleError> {
        *self.requests.borrow_mut() += 1;
        Ok(self.step_json.clone())
    }
}

/// Temp directory pre-seeded with files, for executor and index tests.
pub fn seeded_workspace(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (rel, content) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(&path, content).expect("seed file");
    }
    dir
}

/// Read a file back out of a workspace, panicking on failure.
pub fn read_workspace_file(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).expect("read workspace file")
}
