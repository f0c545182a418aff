use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::connection::{ConnError, Connection};
use crate::frame::{Command, Frame};
use crate::subscription::Subscription;

/// Lifecycle of a transaction. Committed and Aborted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionState::Open)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionState::Open => "open",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        })
    }
}

/// Finished transaction ids a connection remembers for reuse checks.
pub(crate) const FINISHED_TRANSACTION_LIMIT: usize = 1024;

/// State shared by the table and every handle of one transaction.
pub(crate) type TransactionCell = Arc<Mutex<TransactionState>>;

fn read_state(cell: &TransactionCell) -> TransactionState {
    *cell.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-connection transaction bookkeeping.
///
/// Open transactions are kept until they finish. Finished ones are kept as
/// tombstones, oldest evicted first once more than `limit` have finished.
pub(crate) struct TransactionTable {
    cells: HashMap<String, TransactionCell>,
    finished: VecDeque<String>,
    limit: usize,
}

impl TransactionTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            cells: HashMap::new(),
            finished: VecDeque::new(),
            limit,
        }
    }

    pub(crate) fn state(&self, id: &str) -> Option<TransactionState> {
        self.cells.get(id).map(read_state)
    }

    /// Register `id` as Open.
    pub(crate) fn open(&mut self, id: &str) -> Result<TransactionCell, ConnError> {
        if let Some(state) = self.state(id) {
            return Err(ConnError::Usage(format!(
                "transaction '{}' already exists ({})",
                id, state
            )));
        }
        let cell = Arc::new(Mutex::new(TransactionState::Open));
        self.cells.insert(id.to_string(), Arc::clone(&cell));
        Ok(cell)
    }

    /// Drop an Open entry whose BEGIN never went out.
    pub(crate) fn forget(&mut self, id: &str) {
        self.cells.remove(id);
    }

    /// Move `id` from Open to `outcome`.
    pub(crate) fn finish(&mut self, id: &str, outcome: TransactionState) -> Result<(), ConnError> {
        let Some(cell) = self.cells.get(id) else {
            return Err(ConnError::Usage(format!("unknown transaction '{}'", id)));
        };
        {
            let mut state = cell.lock().unwrap_or_else(PoisonError::into_inner);
            if state.is_terminal() {
                return Err(ConnError::Usage(format!(
                    "transaction '{}' is already {}",
                    id, *state
                )));
            }
            *state = outcome;
        }
        self.finished.push_back(id.to_string());
        while self.finished.len() > self.limit {
            if let Some(oldest) = self.finished.pop_front() {
                self.cells.remove(&oldest);
            }
        }
        Ok(())
    }
}

/// An open BEGIN scope on a connection.
///
/// Every frame sent through it carries the `transaction` header. After
/// `commit` or `abort` any further use of this handle fails with
/// `ConnError::Usage`. `Connection::send_frame` rejects the id too, for as
/// long as the connection remembers it.
#[derive(Clone)]
pub struct Transaction {
    id: String,
    state: TransactionCell,
    conn: Connection,
}

impl Transaction {
    pub(crate) fn new(id: String, state: TransactionCell, conn: Connection) -> Self {
        Self { id, state, conn }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        read_state(&self.state)
    }

    fn ensure_open(&self) -> Result<(), ConnError> {
        match self.state() {
            TransactionState::Open => Ok(()),
            finished => Err(ConnError::Usage(format!(
                "transaction '{}' is already {}",
                self.id, finished
            ))),
        }
    }

    /// Send `frame` as part of this transaction.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), ConnError> {
        self.ensure_open()?;
        self.conn
            .send_frame(frame.header("transaction", self.id.as_str()))
            .await
    }

    pub async fn send(
        &self,
        destination: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), ConnError> {
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", content_type)
            .set_body(body);
        self.send_frame(frame).await
    }

    /// Acknowledge `message` inside this transaction.
    pub async fn ack(&self, subscription: &Subscription, message: &Frame) -> Result<(), ConnError> {
        self.ensure_open()?;
        subscription
            .acknowledge(Command::Ack, message, Some(&self.id))
            .await
    }

    pub async fn nack(&self, subscription: &Subscription, message: &Frame) -> Result<(), ConnError> {
        self.ensure_open()?;
        subscription
            .acknowledge(Command::Nack, message, Some(&self.id))
            .await
    }

    pub async fn commit(&self) -> Result<(), ConnError> {
        self.ensure_open()?;
        self.conn.commit(&self.id).await
    }

    pub async fn abort(&self) -> Result<(), ConnError> {
        self.ensure_open()?;
        self.conn.abort(&self.id).await
    }
}
