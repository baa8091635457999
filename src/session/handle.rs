//! Public session lifecycle interface.
//!
//! [`spawn`] validates the configuration, launches the session task, and
//! returns a [`SessionHandle`]. The handle talks to the task over a control
//! inbox; subscribers receive messages on bounded channels that the session
//! fills fire-and-forget.

use tokio::sync::{mpsc, oneshot};

use super::Session;
use super::state::MailboxSnapshot;
use crate::connection::SessionConfig;
use crate::filter::Filter;
use crate::message::DeliveredMessage;
use crate::parser::{CopyUid, ListEntry};
use crate::{Error, Result};

/// Capacity of each subscriber's delivery channel. A subscriber that falls
/// further behind loses messages rather than stalling the protocol.
pub(crate) const DELIVERY_BUFFER: usize = 32;

/// Capacity of the session control inbox.
const CONTROL_BUFFER: usize = 16;

/// Identifier for one subscription within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub(crate) u64);

/// Control messages from handles to the session task.
pub(crate) enum ControlMsg {
    Subscribe {
        filter: Filter,
        sender: mpsc::Sender<DeliveredMessage>,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unsubscribe {
        id: SubscriberId,
        reply: oneshot::Sender<bool>,
    },
    Capabilities {
        reply: oneshot::Sender<Vec<String>>,
    },
    Snapshot {
        reply: oneshot::Sender<MailboxSnapshot>,
    },
    List {
        reference: String,
        pattern: String,
        reply: oneshot::Sender<Result<Vec<ListEntry>>>,
    },
    Create {
        mailbox: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Copy {
        seqs: Vec<u32>,
        mailbox: String,
        mv: bool,
        reply: oneshot::Sender<Result<Option<CopyUid>>>,
    },
    Shutdown,
}

/// A registered subscription: the receiving end of a delivery channel.
///
/// Dropping the subscription closes the channel; the session keeps the
/// registration until [`SessionHandle::unsubscribe`], but deliveries to a
/// closed channel are silently dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<DeliveredMessage>,
}

impl Subscription {
    /// Returns the subscription id, for [`SessionHandle::unsubscribe`].
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Receives the next delivered message.
    ///
    /// Returns `None` once the session has terminated.
    pub async fn recv(&mut self) -> Option<DeliveredMessage> {
        self.receiver.recv().await
    }
}

/// Handle to a running session.
///
/// Cloneable; every clone talks to the same session task. Methods return
/// [`Error::ConnectionLost`] once the session has terminated.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    control: mpsc::Sender<ControlMsg>,
}

/// Spawns a session task watching the configured mailbox.
///
/// Configuration problems are reported synchronously; connection and login
/// happen on the spawned task. Must be called within a tokio runtime.
///
/// # Errors
///
/// Returns [`Error::Config`] for an invalid configuration.
pub fn spawn(config: SessionConfig) -> Result<SessionHandle> {
    config.validate()?;

    let (control, inbox) = mpsc::channel(CONTROL_BUFFER);
    tokio::spawn(Session::run(config, inbox));

    Ok(SessionHandle { control })
}

/// Spawns a session over an already-established transport.
///
/// Used to drive a session against in-memory streams in tests; production
/// callers use [`spawn`], which connects per the configuration.
///
/// # Errors
///
/// Returns [`Error::Config`] for an invalid configuration.
pub fn spawn_with_transport(
    config: SessionConfig,
    stream: crate::connection::ImapStream,
) -> Result<SessionHandle> {
    config.validate()?;

    let (control, inbox) = mpsc::channel(CONTROL_BUFFER);
    tokio::spawn(Session::run_on(config, stream, inbox));

    Ok(SessionHandle { control })
}

impl SessionHandle {
    /// Registers a subscriber with the given filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the session has terminated.
    pub async fn subscribe(&self, filter: Filter) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(DELIVERY_BUFFER);
        let (reply, rx) = oneshot::channel();
        self.send(ControlMsg::Subscribe {
            filter,
            sender,
            reply,
        })
        .await?;
        let id = rx.await.map_err(|_| session_gone())?;
        Ok(Subscription { id, receiver })
    }

    /// Removes every registration for the given subscription id.
    ///
    /// Returns true if a registration was removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the session has terminated.
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMsg::Unsubscribe { id, reply }).await?;
        rx.await.map_err(|_| session_gone())
    }

    /// Returns the capabilities the server last advertised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the session has terminated.
    pub async fn capabilities(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMsg::Capabilities { reply }).await?;
        rx.await.map_err(|_| session_gone())
    }

    /// Returns the current snapshot of the watched mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the session has terminated.
    pub async fn snapshot(&self) -> Result<MailboxSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMsg::Snapshot { reply }).await?;
        rx.await.map_err(|_| session_gone())
    }

    /// Lists mailboxes matching `pattern` under `reference`.
    ///
    /// # Errors
    ///
    /// Returns the server's NO/BAD text for a rejected command, or
    /// [`Error::ConnectionLost`] if the session has terminated.
    pub async fn list(&self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMsg::List {
            reference: reference.to_string(),
            pattern: pattern.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| session_gone())?
    }

    /// Creates a mailbox. A server reporting it already exists is success.
    ///
    /// # Errors
    ///
    /// Returns the server's NO/BAD text for a rejected command, or
    /// [`Error::ConnectionLost`] if the session has terminated.
    pub async fn create(&self, mailbox: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMsg::Create {
            mailbox: mailbox.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| session_gone())?
    }

    /// Copies messages to another mailbox, returning the COPYUID payload when
    /// the server reports one.
    ///
    /// # Errors
    ///
    /// Returns the server's NO/BAD text for a rejected command, or
    /// [`Error::ConnectionLost`] if the session has terminated.
    pub async fn copy_messages(&self, seqs: Vec<u32>, mailbox: &str) -> Result<Option<CopyUid>> {
        self.copy_or_move(seqs, mailbox, false).await
    }

    /// Moves messages to another mailbox, returning the COPYUID payload when
    /// the server reports one.
    ///
    /// # Errors
    ///
    /// Returns the server's NO/BAD text for a rejected command, or
    /// [`Error::ConnectionLost`] if the session has terminated.
    pub async fn move_messages(&self, seqs: Vec<u32>, mailbox: &str) -> Result<Option<CopyUid>> {
        self.copy_or_move(seqs, mailbox, true).await
    }

    async fn copy_or_move(
        &self,
        seqs: Vec<u32>,
        mailbox: &str,
        mv: bool,
    ) -> Result<Option<CopyUid>> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMsg::Copy {
            seqs,
            mailbox: mailbox.to_string(),
            mv,
            reply,
        })
        .await?;
        rx.await.map_err(|_| session_gone())?
    }

    /// Requests a cooperative shutdown: LOGOUT if authenticated, then close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the session already terminated.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(ControlMsg::Shutdown).await
    }

    async fn send(&self, msg: ControlMsg) -> Result<()> {
        self.control.send(msg).await.map_err(|_| session_gone())
    }
}

fn session_gone() -> Error {
    Error::ConnectionLost("session task is gone".to_string())
}
