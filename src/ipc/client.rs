//! Client side of the coordinator socket
//!
//! Used by the CLI and by targets living in other OS processes. One
//! connection is shared by every caller of a client; requests are
//! serialised on it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::common::{error::IpcError, paths, Error, Result};
use crate::registry::{
    BreakCount, BreakCountKey, Breakpoint, BreakpointKey, DeleteOutcome, InsertOutcome,
    ProcessToken, SharedStore, UpsertOutcome,
};

use super::protocol::{
    AffectedResult, Command, DeleteResult, HasAnyResult, InsertResult, ListResult, LookupResult,
    MarkBusyResult, RegisterResult, Request, Response, StatusResult, UpsertResult,
    ValidateResult,
};
use super::transport::{self, Stream};

struct Connection {
    reader: ReadHalf<Stream>,
    writer: WriteHalf<Stream>,
    next_id: u64,
}

/// Client for communicating with the coordinator
pub struct CoordinatorClient {
    connection: Mutex<Connection>,
}

impl CoordinatorClient {
    /// Connect to the running coordinator at the default socket
    pub async fn connect() -> Result<Self> {
        Self::connect_to(&paths::socket_name()).await
    }

    /// Connect to a coordinator listening on `name`
    pub async fn connect_to(name: &str) -> Result<Self> {
        let stream = transport::connect(name).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                Error::CoordinatorNotRunning
            } else {
                Error::CoordinatorConnectionFailed(e)
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);

        Ok(Self {
            connection: Mutex::new(Connection {
                reader,
                writer,
                next_id: 1,
            }),
        })
    }

    /// Send a command and wait for the response
    pub async fn send_command(&self, command: Command) -> Result<serde_json::Value> {
        let mut conn = self.connection.lock().await;

        let id = conn.next_id;
        conn.next_id += 1;

        let request = Request { id, command };
        let json = serde_json::to_vec(&request)?;

        transport::send_message(&mut conn.writer, &json)
            .await
            .map_err(|e| Error::CoordinatorCommunication(e.to_string()))?;

        let response_data = transport::recv_message(&mut conn.reader)
            .await
            .map_err(|e| Error::CoordinatorCommunication(e.to_string()))?;
        drop(conn);

        let response: Response = serde_json::from_slice(&response_data)?;

        if response.id != id {
            return Err(Error::CoordinatorCommunication(format!(
                "Response ID mismatch: expected {}, got {}",
                id, response.id
            )));
        }

        if response.success {
            Ok(response.result.unwrap_or(serde_json::json!({})))
        } else {
            let error = response.error.unwrap_or_else(|| IpcError {
                code: "UNKNOWN".to_string(),
                message: "Unknown error".to_string(),
            });
            Err(error.into())
        }
    }

    async fn call<T: DeserializeOwned>(&self, command: Command) -> Result<T> {
        let value = self.send_command(command).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn status(&self) -> Result<StatusResult> {
        self.call(Command::Status).await
    }

    /// Ask the coordinator to exit
    pub async fn shutdown(&self) -> Result<()> {
        self.send_command(Command::Shutdown).await?;
        Ok(())
    }

    /// Check if the coordinator is responding
    pub async fn ping(&self) -> Result<bool> {
        match self.send_command(Command::Status).await {
            Ok(_) => Ok(true),
            Err(Error::CoordinatorNotRunning) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SharedStore for CoordinatorClient {
    async fn lookup(&self, key: BreakpointKey) -> Result<Option<Breakpoint>> {
        let result: LookupResult = self.call(Command::Lookup { key }).await?;
        Ok(result.breakpoint)
    }

    async fn has_any(&self, entity: BreakCountKey) -> Result<bool> {
        let result: HasAnyResult = self.call(Command::HasAny { entity }).await?;
        Ok(result.has_any)
    }

    async fn insert(&self, breakpoint: Breakpoint) -> Result<InsertOutcome> {
        let result: InsertResult = self.call(Command::Insert { breakpoint }).await?;
        Ok(result.outcome)
    }

    async fn insert_or_update(&self, breakpoint: Breakpoint) -> Result<UpsertOutcome> {
        let result: UpsertResult = self.call(Command::InsertOrUpdate { breakpoint }).await?;
        Ok(result.outcome)
    }

    async fn delete(&self, key: BreakpointKey) -> Result<DeleteOutcome> {
        let result: DeleteResult = self.call(Command::Delete { key }).await?;
        Ok(result.outcome)
    }

    async fn mark_busy(&self, proxy_pid: i32) -> Result<Vec<Breakpoint>> {
        let result: MarkBusyResult = self.call(Command::MarkBusy { proxy_pid }).await?;
        Ok(result.breakpoints)
    }

    async fn free_session(&self, proxy_pid: i32) -> Result<usize> {
        let result: AffectedResult = self.call(Command::FreeSession { proxy_pid }).await?;
        Ok(result.affected)
    }

    async fn cleanup_for_proxy(&self, proxy_pid: i32) -> Result<usize> {
        let result: AffectedResult = self.call(Command::CleanupProxy { proxy_pid }).await?;
        Ok(result.affected)
    }

    async fn list(&self) -> Result<(Vec<Breakpoint>, Vec<BreakCount>)> {
        let result: ListResult = self.call(Command::List).await?;
        Ok((result.breakpoints, result.counts))
    }

    async fn register_process(&self, pid: i32) -> Result<ProcessToken> {
        let result: RegisterResult = self.call(Command::RegisterProcess { pid }).await?;
        Ok(result.token)
    }

    async fn deregister_process(&self, pid: i32) -> Result<()> {
        self.send_command(Command::DeregisterProcess { pid }).await?;
        Ok(())
    }

    async fn validate_process(&self, pid: i32, token: ProcessToken) -> Result<bool> {
        let result: ValidateResult = self.call(Command::ValidateProcess { pid, token }).await?;
        Ok(result.valid)
    }
}
