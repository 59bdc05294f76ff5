//! Router transport port
//!
//! The core never speaks a wire protocol itself; it consumes this port.
//! Replies stay as `map<String, String>` rows at this seam and are parsed
//! into typed domain objects immediately on entry to the consumer
//! (see the capability detector) so untyped maps never travel further.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::errors::{CoreError, CoreResult, codes};

/// A read of router state at a router-native path, e.g. `/system/resource`.
#[derive(Debug, Clone)]
pub struct StateQuery {
    pub path: String,
    pub fields: Option<Vec<String>>,
    pub filter: Option<HashMap<String, String>>,
    pub limit: Option<u32>,
}

impl StateQuery {
    /// Query for every resource at a path
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fields: None,
            filter: None,
            limit: None,
        }
    }

    /// Restricts the reply to the given fields
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| (*f).to_string()).collect());
        self
    }
}

/// Reply to a [`StateQuery`]
#[derive(Debug, Clone, Default)]
pub struct StateReply {
    pub resources: Vec<HashMap<String, String>>,
    pub count: usize,
}

impl StateReply {
    /// The first resource row, if any
    pub fn first(&self) -> Option<&HashMap<String, String>> {
        self.resources.first()
    }
}

/// A mutating router operation
#[derive(Debug, Clone)]
pub struct RouterCommand {
    pub path: String,
    pub action: String,
    pub args: Vec<String>,
    pub props: Option<HashMap<String, String>>,
}

/// Result of a [`RouterCommand`]
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub success: bool,
    pub id: Option<String>,
    pub data: HashMap<String, String>,
    pub error: Option<String>,
}

/// Query router state paths and execute router commands.
#[async_trait]
pub trait RouterTransport: Send + Sync + std::fmt::Debug {
    /// Reads state at a router-native path.
    async fn query_state(&self, query: StateQuery) -> CoreResult<StateReply>;

    /// Executes a command against the router.
    async fn execute_command(&self, command: RouterCommand) -> CoreResult<CommandOutcome>;
}

/// Type alias for a shared router transport
pub type SharedRouterTransport = Arc<dyn RouterTransport>;

/// Canned-response transport for tests.
///
/// Paths answer with pre-loaded rows; unknown paths answer with an empty
/// reply; paths marked failing answer with a protocol error. Every query is
/// logged so tests can assert how often the detector ran.
#[derive(Debug, Default)]
pub struct StubRouterTransport {
    responses: Mutex<HashMap<String, Vec<HashMap<String, String>>>>,
    failing_paths: Mutex<HashSet<String>>,
    queries: Mutex<Vec<String>>,
    commands: Mutex<Vec<RouterCommand>>,
}

impl StubRouterTransport {
    /// Creates a stub with no canned responses
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared stub
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Loads canned rows for a path
    pub fn respond(&self, path: &str, rows: Vec<HashMap<String, String>>) {
        self.responses
            .lock()
            .expect("stub lock poisoned")
            .insert(path.to_string(), rows);
    }

    /// Makes queries against a path fail with a protocol error
    pub fn fail_path(&self, path: &str) {
        self.failing_paths
            .lock()
            .expect("stub lock poisoned")
            .insert(path.to_string());
    }

    /// Paths queried so far, in order
    pub fn queried_paths(&self) -> Vec<String> {
        self.queries.lock().expect("stub lock poisoned").clone()
    }

    /// Commands executed so far, in order
    pub fn executed_commands(&self) -> Vec<RouterCommand> {
        self.commands.lock().expect("stub lock poisoned").clone()
    }
}

/// Builds a string-map row from literal pairs; test convenience.
pub fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[async_trait]
impl RouterTransport for StubRouterTransport {
    async fn query_state(&self, query: StateQuery) -> CoreResult<StateReply> {
        self.queries
            .lock()
            .expect("stub lock poisoned")
            .push(query.path.clone());

        if self
            .failing_paths
            .lock()
            .expect("stub lock poisoned")
            .contains(&query.path)
        {
            return Err(CoreError::protocol(
                codes::ROUTER_QUERY_FAILED,
                format!("query failed: {}", query.path),
            )
            .with_context("path", query.path));
        }

        let resources = self
            .responses
            .lock()
            .expect("stub lock poisoned")
            .get(&query.path)
            .cloned()
            .unwrap_or_default();
        let count = resources.len();
        Ok(StateReply { resources, count })
    }

    async fn execute_command(&self, command: RouterCommand) -> CoreResult<CommandOutcome> {
        self.commands
            .lock()
            .expect("stub lock poisoned")
            .push(command);
        Ok(CommandOutcome {
            success: true,
            ..Default::default()
        })
    }
}
