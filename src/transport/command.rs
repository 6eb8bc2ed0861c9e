// MIT License - Copyright (c) 2026 Peter Wright
// Command dispatch and response correlation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ResultCode, Result, SatelError};
use crate::protocol::{Command, Frame};
use crate::transport::connection::Connection;

/// A command sent to the panel and not yet answered.
struct PendingCommand {
    command: &'static str,
    issued_at: Instant,
    token: u64,
    tx: oneshot::Sender<Result<ResultCode>>,
    timer: JoinHandle<()>,
}

struct PendingTable {
    /// Next correlation id to try (1-255)
    next_id: u8,
    entries: HashMap<u8, PendingCommand>,
}

impl PendingTable {
    /// Pick the next free correlation id, skipping 0 and ids in flight.
    fn allocate(&mut self) -> Result<u8> {
        for _ in 0..u8::MAX {
            let id = self.next_id;
            self.next_id = if id == u8::MAX { 1 } else { id + 1 };
            if !self.entries.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(SatelError::TooManyPending)
    }
}

/// Sends commands and routes each response back to its caller by
/// correlation id.
///
/// Every command gets its own timeout, enforced by a detached timer, so a
/// caller dropping its future neither cancels the command nor leaks the
/// pending entry.
pub struct CommandDispatcher {
    connection: Arc<Connection>,
    pending: Arc<Mutex<PendingTable>>,
    next_token: AtomicU64,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(connection: Arc<Connection>, timeout: Duration) -> Self {
        Self {
            connection,
            pending: Arc::new(Mutex::new(PendingTable {
                next_id: 1,
                entries: HashMap::new(),
            })),
            next_token: AtomicU64::new(1),
            timeout,
        }
    }

    /// Send a command and return the panel's result code as is.
    pub async fn send(&self, command: Command) -> Result<ResultCode> {
        if !self.connection.is_connected() {
            return Err(SatelError::Disconnected);
        }

        let name = command.name();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let correlation_id = {
            let mut table = self.pending.lock().await;
            let id = table.allocate()?;
            let timer = self.spawn_timer(id, token, name);
            table.entries.insert(
                id,
                PendingCommand {
                    command: name,
                    issued_at: Instant::now(),
                    token,
                    tx,
                    timer,
                },
            );
            id
        };

        debug!("Sending {} (corr {})", name, correlation_id);
        if let Err(e) = self
            .connection
            .send(Frame::Request {
                correlation_id,
                command,
            })
            .await
        {
            self.discard(correlation_id, token).await;
            return Err(e);
        }

        rx.await.unwrap_or(Err(SatelError::ConnectionLost))
    }

    /// Send a command and map the result code: success is `Ok`, credential
    /// failures are `Auth`, anything else is `Rejected`.
    pub async fn execute(&self, command: Command) -> Result<()> {
        let name = command.name();
        let result = self.send(command).await?;
        if result.is_success() {
            Ok(())
        } else if result.is_auth_failure() {
            warn!("Panel refused credentials for {}: {}", name, result);
            Err(SatelError::Auth(result))
        } else {
            warn!("Panel rejected {}: {}", name, result);
            Err(SatelError::Rejected(result))
        }
    }

    /// Deliver a response. Unknown or late correlation ids are discarded.
    pub async fn resolve(&self, correlation_id: u8, result: u8) -> bool {
        let Some(entry) = self.pending.lock().await.entries.remove(&correlation_id) else {
            debug!(
                "Discarding response for unknown correlation id {}",
                correlation_id
            );
            return false;
        };
        entry.timer.abort();

        let outcome = ResultCode::from_byte(result).ok_or(SatelError::UnknownResultCode(result));
        debug!(
            "{} (corr {}) answered {:?} after {:?}",
            entry.command,
            correlation_id,
            outcome,
            entry.issued_at.elapsed()
        );
        // Caller may be gone
        let _ = entry.tx.send(outcome);
        true
    }

    /// Fail every pending command with the error built by `err`.
    pub async fn fail_all(&self, err: impl Fn() -> SatelError) -> usize {
        let drained: Vec<_> = self.pending.lock().await.entries.drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.timer.abort();
            debug!("Failing {} (corr {})", entry.command, id);
            let _ = entry.tx.send(Err(err()));
        }
        if count > 0 {
            warn!("Failed {} pending commands", count);
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.entries.len()
    }

    async fn discard(&self, correlation_id: u8, token: u64) {
        let mut table = self.pending.lock().await;
        if table
            .entries
            .get(&correlation_id)
            .is_some_and(|e| e.token == token)
            && let Some(entry) = table.entries.remove(&correlation_id)
        {
            entry.timer.abort();
        }
    }

    fn spawn_timer(&self, correlation_id: u8, token: u64, command: &'static str) -> JoinHandle<()> {
        let pending = self.pending.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            sleep(timeout).await;
            let mut table = pending.lock().await;
            // The id may have been reused by a later command
            if !table
                .entries
                .get(&correlation_id)
                .is_some_and(|e| e.token == token)
            {
                return;
            }
            if let Some(entry) = table.entries.remove(&correlation_id) {
                drop(table);
                warn!("Command timeout: {} (corr {})", command, correlation_id);
                let _ = entry.tx.send(Err(SatelError::CommandTimeout {
                    command: command.to_string(),
                }));
            }
        })
    }
}
