//! Driver stub and skeleton.

use std::sync::Arc;
use std::time::Duration;

use hookwire_bridge::{RemoteError, RequestHandler, RpcClient, decode_params, encode_result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{Driver, ExecResult, Row};

const QUERY: &str = "query";
const EXEC: &str = "exec";

#[derive(Debug, Serialize, Deserialize)]
struct StatementArgs {
    statement: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// Plugin-side [`Driver`] forwarding statements over the driver stream.
#[derive(Debug)]
pub struct DriverClient {
    rpc: RpcClient,
    deadline: Option<Duration>,
}

impl DriverClient {
    /// Wraps a client dialled on the driver stream.
    #[must_use]
    pub const fn new(rpc: RpcClient, deadline: Option<Duration>) -> Self {
        Self { rpc, deadline }
    }

    fn statement(statement: &str, args: &[Value]) -> StatementArgs {
        StatementArgs {
            statement: statement.to_owned(),
            args: args.to_vec(),
        }
    }
}

impl Driver for DriverClient {
    fn query(&self, statement: &str, args: &[Value]) -> Result<Vec<Row>, RemoteError> {
        self.rpc
            .call(QUERY, &Self::statement(statement, args), self.deadline)
            .map_err(super::into_remote)
    }

    fn exec(&self, statement: &str, args: &[Value]) -> Result<ExecResult, RemoteError> {
        self.rpc
            .call(EXEC, &Self::statement(statement, args), self.deadline)
            .map_err(super::into_remote)
    }
}

/// Host-side handler serving a [`Driver`] on the driver stream.
pub struct DriverServer {
    driver: Arc<dyn Driver>,
}

impl DriverServer {
    /// Serves `driver`.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }
}

impl RequestHandler for DriverServer {
    fn handle(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
        match method {
            QUERY => {
                let args: StatementArgs = decode_params(params)?;
                encode_result(&self.driver.query(&args.statement, &args.args)?)
            }
            EXEC => {
                let args: StatementArgs = decode_params(params)?;
                encode_result(&self.driver.exec(&args.statement, &args.args)?)
            }
            other => Err(RemoteError::MethodNotFound {
                method: other.to_owned(),
            }),
        }
    }
}
