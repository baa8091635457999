//! The session actor.
//!
//! One task per session owns the socket and alternates between transport
//! reads, control messages, and timers. Lifecycle transitions and the fetch
//! pipeline are both driven by a single match on the completed command's
//! [`TagKind`] and status; at most one non-IDLE command is ever in flight.

mod handle;
mod pipeline;
mod state;

pub use handle::{SessionHandle, SubscriberId, Subscription, spawn, spawn_with_transport};
pub use state::{Access, MailboxSnapshot, Phase};

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::command::{Command, TagSequence};
use crate::connection::{FramedStream, ImapStream, SessionConfig, connect_plain, connect_tls};
use crate::filter::Filter;
use crate::message::{DeliveredMessage, FetchStage, MessageIndex};
use crate::parser::{Action, ResponseParser, Status};
use crate::{Error, Result};

use handle::ControlMsg;
use state::{TagKind, TagTable};

/// Re-issue IDLE after this long, staying under the RFC 2177 half hour.
const IDLE_REFRESH: Duration = Duration::from_secs(27 * 60);

/// Poll interval when the server lacks IDLE.
const NOOP_POLL: Duration = Duration::from_secs(5);

/// One registered subscriber.
struct Subscriber {
    id: SubscriberId,
    filter: Filter,
    sender: mpsc::Sender<DeliveredMessage>,
}

/// IDLE protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleState {
    /// Not idling.
    Inactive,
    /// IDLE written; waiting for the continuation request.
    Requested,
    /// Continuation received; the server may push updates.
    Active,
    /// DONE written; waiting for the tagged completion.
    CancelRequested,
}

/// Which timer the single deadline belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Cancel and re-enter IDLE.
    IdleRefresh,
    /// Send a NOOP keep-alive.
    NoopPoll,
}

/// What woke the session loop.
enum Wake {
    Packet(Result<Vec<u8>>),
    Control(Option<ControlMsg>),
    Timer,
}

/// Whether the session should keep running after an event.
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Session {
    config: SessionConfig,
    stream: Option<FramedStream<ImapStream>>,
    inbox: mpsc::Receiver<ControlMsg>,
    inbox_open: bool,

    tags: TagSequence,
    table: TagTable,
    phase: Phase,
    access: Access,
    capabilities: Vec<String>,
    snapshot: MailboxSnapshot,
    index: MessageIndex,

    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
    queued: VecDeque<(Command, TagKind)>,

    idle: IdleState,
    timer: Option<TimerKind>,
    deadline: Instant,
    /// Non-IDLE commands outstanding; 0 or 1 by construction.
    in_flight: usize,
    closing: bool,
    logout_sent: bool,
}

impl Session {
    /// Connects and runs the session until it terminates.
    pub(crate) async fn run(config: SessionConfig, inbox: mpsc::Receiver<ControlMsg>) {
        let name = config.name.clone();
        let stream = if config.tls {
            connect_tls(&config.server, config.port, config.ssl_verify).await
        } else {
            connect_plain(&config.server, config.port).await
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(name = %name, %error, "failed to connect");
                return;
            }
        };
        tracing::info!(
            name = %name,
            server = %config.server,
            port = config.port,
            tls = config.tls,
            "connected"
        );

        Self::run_on(config, stream, inbox).await;
    }

    /// Runs the session over an already-established transport.
    pub(crate) async fn run_on(
        config: SessionConfig,
        stream: ImapStream,
        inbox: mpsc::Receiver<ControlMsg>,
    ) {
        let name = config.name.clone();
        let mut session = Self {
            config,
            stream: Some(FramedStream::new(stream)),
            inbox,
            inbox_open: true,
            tags: TagSequence::new(),
            table: TagTable::default(),
            phase: Phase::Greeting,
            access: Access::default(),
            capabilities: Vec::new(),
            snapshot: MailboxSnapshot::default(),
            index: MessageIndex::default(),
            subscribers: Vec::new(),
            next_subscriber_id: 0,
            queued: VecDeque::new(),
            idle: IdleState::Inactive,
            timer: None,
            deadline: Instant::now(),
            in_flight: 0,
            closing: false,
            logout_sent: false,
        };

        match session.drive().await {
            Ok(()) => tracing::info!(name = %name, "session ended"),
            Err(error) if error.is_connection_dead() => {
                tracing::warn!(name = %name, %error, "session lost");
            }
            Err(error) => tracing::error!(name = %name, %error, "session failed"),
        }

        // Abandon outstanding callbacks; dropping the reply senders resolves
        // waiting handles with ConnectionLost.
        for entry in session.table.drain() {
            tracing::debug!(command = entry.command, "abandoning outstanding tag");
        }
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.pump().await?;

            let armed = self.timer.is_some();
            let deadline = self.deadline;
            let inbox_open = self.inbox_open;

            let wake = {
                let stream = self
                    .stream
                    .as_mut()
                    .ok_or_else(|| Error::ConnectionLost("transport closed".to_string()))?;
                tokio::select! {
                    packet = stream.read_packet() => Wake::Packet(packet),
                    msg = self.inbox.recv(), if inbox_open => Wake::Control(msg),
                    () = tokio::time::sleep_until(deadline), if armed => Wake::Timer,
                }
            };

            match wake {
                Wake::Packet(Ok(packet)) => {
                    if let Flow::Stop = self.on_packet(&packet).await? {
                        return Ok(());
                    }
                }
                Wake::Packet(Err(error)) => {
                    if self.closing && error.is_connection_dead() {
                        return Ok(());
                    }
                    return Err(error);
                }
                Wake::Control(Some(msg)) => self.on_control(msg).await?,
                Wake::Control(None) => {
                    // Every handle dropped: shut the session down.
                    self.inbox_open = false;
                    self.begin_shutdown();
                }
                Wake::Timer => self.on_timer().await?,
            }
        }
    }

    /// Advances the session whenever the wire is quiet: cancels IDLE when
    /// work appeared, dispatches queued user commands and pipeline stages,
    /// and re-enters IDLE (or arms the NOOP poll) when nothing is pending.
    async fn pump(&mut self) -> Result<()> {
        if self.in_flight > 0 {
            return Ok(());
        }

        match self.idle {
            IdleState::Inactive => {}
            IdleState::Active => {
                if self.has_pending_work() {
                    self.write_done().await?;
                }
                return Ok(());
            }
            IdleState::Requested | IdleState::CancelRequested => return Ok(()),
        }

        if self.closing {
            if !self.logout_sent {
                self.logout_sent = true;
                self.send(Command::Logout, TagKind::Logout).await?;
            }
            return Ok(());
        }

        if self.phase != Phase::Steady {
            return Ok(());
        }

        if let Some((command, kind)) = self.queued.pop_front() {
            return self.send(command, kind).await;
        }

        if let Some((command, kind)) = self.next_pipeline_command() {
            return self.send(command, kind).await;
        }

        // Quiet: idle, or schedule a poll.
        if self.capabilities.iter().any(|c| c == "IDLE") {
            self.idle = IdleState::Requested;
            self.arm_timer(TimerKind::IdleRefresh, IDLE_REFRESH);
            let tag = self.tags.next();
            self.table.insert(tag, "IDLE", TagKind::Idle);
            let bytes = Command::Idle.serialize(tag)?;
            self.write(&bytes).await?;
        } else if self.timer.is_none() {
            self.arm_timer(TimerKind::NoopPoll, NOOP_POLL);
        }

        Ok(())
    }

    fn has_pending_work(&self) -> bool {
        self.closing || !self.queued.is_empty() || !self.index.is_empty()
    }

    fn arm_timer(&mut self, kind: TimerKind, after: Duration) {
        self.timer = Some(kind);
        self.deadline = Instant::now() + after;
    }

    async fn on_timer(&mut self) -> Result<()> {
        match self.timer.take() {
            Some(TimerKind::IdleRefresh) => {
                if matches!(self.idle, IdleState::Active | IdleState::Requested) {
                    self.write_done().await?;
                }
            }
            Some(TimerKind::NoopPoll) => {
                if self.in_flight == 0 && self.idle == IdleState::Inactive && !self.closing {
                    self.send(Command::Noop, TagKind::Noop).await?;
                }
            }
            None => {}
        }
        Ok(())
    }

    async fn on_packet(&mut self, packet: &[u8]) -> Result<Flow> {
        if self.phase == Phase::Greeting {
            // The greeting's content is irrelevant; capabilities are fetched
            // explicitly.
            tracing::debug!(
                greeting = %String::from_utf8_lossy(packet).trim_end(),
                "greeting received"
            );
            self.phase = Phase::CapabilityUnauth;
            self.send(Command::Capability, TagKind::Capability { post_auth: false })
                .await?;
            return Ok(Flow::Continue);
        }

        let actions = ResponseParser::parse(packet)?;
        for action in actions {
            if let Flow::Stop = self.apply_action(action).await? {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    async fn apply_action(&mut self, action: Action) -> Result<Flow> {
        match action {
            Action::Capabilities(caps) => self.capabilities = caps,
            Action::ApplicableFlags(flags) => self.snapshot.applicable_flags = flags,
            Action::PermanentFlags(flags) => self.snapshot.permanent_flags = flags,
            Action::FirstUnseen(n) => self.snapshot.first_unseen = Some(n),
            Action::UidValidity(n) => self.snapshot.uid_validity = Some(n),
            Action::UidNext(n) => self.snapshot.uid_next = Some(n),

            Action::Exists(n) => {
                if self.phase == Phase::Steady {
                    self.index.grow(n);
                    self.snapshot.exists = self.index.exists();
                } else {
                    self.snapshot.exists = n;
                }
            }
            Action::Recent(n) => self.snapshot.recent = n,
            Action::Expunge(seq) => {
                if self.phase == Phase::Steady {
                    self.index.expunge(seq);
                    self.table.renumber_after_expunge(seq);
                    self.snapshot.exists = self.index.exists();
                } else if self.snapshot.exists > 0 {
                    self.snapshot.exists -= 1;
                }
            }
            Action::Fetch { seq, attr } => self.index.apply_fetch(seq, attr),

            Action::ListEntry(entry) => {
                if !self.table.push_list_entry(entry) {
                    tracing::debug!("LIST entry with no LIST in flight; ignoring");
                }
            }
            Action::CopyUid(copyuid) => {
                if !self.table.record_copyuid(copyuid) {
                    tracing::debug!("COPYUID with no COPY in flight; ignoring");
                }
            }

            Action::Continuation => self.on_continuation().await?,
            Action::Tagged { tag, status, text } => return self.on_tagged(tag, status, text).await,
            Action::Bye(text) => {
                if self.closing {
                    return Ok(Flow::Stop);
                }
                return Err(Error::Bye(text));
            }
            Action::Unparsed(raw) => tracing::info!(
                response = %String::from_utf8_lossy(&raw).trim_end(),
                "ignoring unrecognized response"
            ),
        }
        Ok(Flow::Continue)
    }

    async fn on_continuation(&mut self) -> Result<()> {
        match self.idle {
            IdleState::Requested => {
                if self.has_pending_work() {
                    // Work arrived while the IDLE was being set up.
                    self.idle = IdleState::Active;
                    self.write_done().await?;
                } else {
                    self.idle = IdleState::Active;
                }
            }
            _ => tracing::debug!("unexpected continuation request"),
        }
        Ok(())
    }

    /// The state machine: one match on the completed command's kind and the
    /// arrived status.
    #[allow(clippy::too_many_lines)]
    async fn on_tagged(&mut self, tag: u32, status: Status, text: String) -> Result<Flow> {
        let entry = self.table.complete(tag)?;
        if !matches!(entry.kind, TagKind::Idle) {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
        tracing::trace!(tag, command = entry.command, ?status, "tagged response");

        match (entry.kind, status) {
            (TagKind::Capability { post_auth: false }, Status::Ok) => {
                // A config.tls connection has been TLS from the first byte;
                // otherwise STARTTLS has not happened yet at this point.
                if self.config.tls {
                    self.send_login().await?;
                } else if self.capabilities.iter().any(|c| c == "STARTTLS") {
                    self.phase = Phase::UpgradingTls;
                    self.send(Command::StartTls, TagKind::StartTls).await?;
                } else {
                    return Err(Error::Protocol(
                        "plaintext connection and server does not offer STARTTLS".to_string(),
                    ));
                }
            }

            (TagKind::StartTls, Status::Ok) => {
                let framed = self
                    .stream
                    .take()
                    .ok_or_else(|| Error::ConnectionLost("transport closed".to_string()))?;
                let upgraded = framed
                    .into_inner()
                    .upgrade_to_tls(&self.config.server, self.config.ssl_verify)
                    .await?;
                self.stream = Some(FramedStream::new(upgraded));
                tracing::info!(name = %self.config.name, "TLS established via STARTTLS");
                self.send_login().await?;
            }

            (TagKind::Login, Status::Ok) => {
                tracing::info!(name = %self.config.name, "authenticated");
                self.phase = Phase::CapabilityAuth;
                self.send(Command::Capability, TagKind::Capability { post_auth: true })
                    .await?;
            }

            (TagKind::Capability { post_auth: true }, Status::Ok) => {
                self.phase = Phase::Selecting;
                let mailbox = self.config.mailbox.clone();
                self.send(Command::Select { mailbox }, TagKind::Select).await?;
            }

            (TagKind::Select, Status::Ok) => {
                self.access = if text.to_uppercase().contains("READ-ONLY") {
                    Access::ReadOnly
                } else {
                    Access::ReadWrite
                };
                self.index = MessageIndex::with_baseline(self.snapshot.exists);
                self.phase = Phase::Steady;
                tracing::info!(
                    name = %self.config.name,
                    mailbox = %self.config.mailbox,
                    exists = self.snapshot.exists,
                    access = ?self.access,
                    "mailbox selected"
                );
            }

            (TagKind::Fetch { seq, next_stage }, Status::Ok) => {
                if next_stage == FetchStage::Full {
                    self.finalize(seq);
                }
                // Earlier stages advance in pump() now that the wire is free.
            }
            (TagKind::Fetch { seq, .. }, Status::No | Status::Bad) => {
                tracing::warn!(seq, %text, "fetch rejected; dropping message");
                self.index.remove(seq);
            }

            (TagKind::Idle, Status::Ok) => {
                self.idle = IdleState::Inactive;
                if self.timer == Some(TimerKind::IdleRefresh) {
                    self.timer = None;
                }
            }
            (TagKind::Idle, Status::Bad) if text.contains("Expected DONE") => {
                // Some servers answer the cancellation this way; treat it as
                // the acknowledgement.
                tracing::debug!("idle cancellation acknowledged with BAD");
                self.idle = IdleState::Inactive;
                if self.timer == Some(TimerKind::IdleRefresh) {
                    self.timer = None;
                }
            }

            (TagKind::Noop, Status::Ok) => {}

            (TagKind::List { reply, entries }, Status::Ok) => {
                let _ = reply.send(Ok(entries));
            }
            (TagKind::List { reply, .. }, bad) => {
                let _ = reply.send(Err(status_error(bad, text)));
            }

            (TagKind::Create { reply }, Status::Ok) => {
                let _ = reply.send(Ok(()));
            }
            (TagKind::Create { reply }, Status::No)
                if text.to_uppercase().contains("ALREADYEXISTS")
                    || text.to_lowercase().contains("already exists") =>
            {
                let _ = reply.send(Ok(()));
            }
            (TagKind::Create { reply }, bad) => {
                let _ = reply.send(Err(status_error(bad, text)));
            }

            (TagKind::Copy { reply, copyuid }, Status::Ok) => {
                let _ = reply.send(Ok(copyuid));
            }
            (TagKind::Copy { reply, .. }, bad) => {
                let _ = reply.send(Err(status_error(bad, text)));
            }

            (TagKind::Logout, _) => return Ok(Flow::Stop),

            (TagKind::Discarded, _) => {
                tracing::debug!(tag, "result for expunged message discarded");
            }

            // NO or BAD on any remaining lifecycle command is fatal.
            (kind, bad) => {
                tracing::error!(command = ?kind, status = ?bad, %text, "lifecycle command failed");
                return Err(status_error(bad, text));
            }
        }

        Ok(Flow::Continue)
    }

    async fn on_control(&mut self, msg: ControlMsg) -> Result<()> {
        match msg {
            ControlMsg::Subscribe {
                filter,
                sender,
                reply,
            } => {
                let id = SubscriberId(self.next_subscriber_id);
                self.next_subscriber_id += 1;
                self.subscribers.push(Subscriber { id, filter, sender });
                tracing::debug!(id = id.0, total = self.subscribers.len(), "subscribed");
                let _ = reply.send(id);
            }
            ControlMsg::Unsubscribe { id, reply } => {
                let before = self.subscribers.len();
                self.subscribers.retain(|s| s.id != id);
                let removed = self.subscribers.len() != before;
                tracing::debug!(id = id.0, removed, "unsubscribed");
                let _ = reply.send(removed);
            }
            ControlMsg::Capabilities { reply } => {
                let _ = reply.send(self.capabilities.clone());
            }
            ControlMsg::Snapshot { reply } => {
                let _ = reply.send(self.snapshot.clone());
            }
            ControlMsg::List {
                reference,
                pattern,
                reply,
            } => self.queued.push_back((
                Command::List { reference, pattern },
                TagKind::List {
                    reply,
                    entries: Vec::new(),
                },
            )),
            ControlMsg::Create { mailbox, reply } => self
                .queued
                .push_back((Command::Create { mailbox }, TagKind::Create { reply })),
            ControlMsg::Copy {
                seqs,
                mailbox,
                mv,
                reply,
            } => {
                let command = if mv {
                    Command::Move { seqs, mailbox }
                } else {
                    Command::Copy { seqs, mailbox }
                };
                self.queued
                    .push_back((command, TagKind::Copy {
                        reply,
                        copyuid: None,
                    }));
            }
            ControlMsg::Shutdown => self.begin_shutdown(),
        }
        Ok(())
    }

    fn begin_shutdown(&mut self) {
        if self.closing {
            return;
        }
        tracing::info!(name = %self.config.name, "shutdown requested");
        self.closing = true;
        self.timer = None;
        for (_, kind) in self.queued.drain(..) {
            fail_kind(kind);
        }
        // pump() cancels any idle and sends LOGOUT once the wire is free.
    }

    /// Picks the next fetch pipeline command, lowest sequence number first.
    ///
    /// Discards messages no subscriber can accept and messages whose body
    /// structure never arrived; loops until a command is produced or the
    /// index is drained.
    fn next_pipeline_command(&mut self) -> Option<(Command, TagKind)> {
        let filters: Vec<Filter> = self.subscribers.iter().map(|s| s.filter.clone()).collect();

        while let Some(seq) = self.index.first_seq() {
            let stage = self.index.get(seq)?.stage;
            match stage {
                FetchStage::None => {
                    let items = pipeline::filter_fetch_items(&filters);
                    let (items, next_stage) = if items.is_empty() {
                        // No filter needs metadata first; go straight for the
                        // body structure.
                        let msg = self.index.get(seq)?;
                        (pipeline::prebody_fetch_items(msg), FetchStage::PreBody)
                    } else {
                        (items, FetchStage::Filter)
                    };
                    self.index.get_mut(seq)?.stage = next_stage;
                    return Some((Command::Fetch { seq, items }, TagKind::Fetch {
                        seq,
                        next_stage,
                    }));
                }

                FetchStage::Filter => {
                    let msg = self.index.get(seq)?;
                    if pipeline::rejected_by_all(&filters, msg) {
                        tracing::debug!(seq, "no subscriber can accept; discarding");
                        self.index.remove(seq);
                        continue;
                    }
                    let items = pipeline::prebody_fetch_items(msg);
                    self.index.get_mut(seq)?.stage = FetchStage::PreBody;
                    return Some((Command::Fetch { seq, items }, TagKind::Fetch {
                        seq,
                        next_stage: FetchStage::PreBody,
                    }));
                }

                FetchStage::PreBody => {
                    let msg = self.index.get(seq)?;
                    let Some(structure) = &msg.body_structure else {
                        tracing::warn!(seq, "no body structure after metadata fetch; dropping");
                        self.index.remove(seq);
                        continue;
                    };
                    let items = pipeline::part_fetch_items(structure);
                    return Some((Command::Fetch { seq, items }, TagKind::Fetch {
                        seq,
                        next_stage: FetchStage::Full,
                    }));
                }

                FetchStage::Full => {
                    self.finalize(seq);
                    continue;
                }
            }
        }
        None
    }

    /// Assembles the finished message and delivers it to every accepting
    /// subscriber. Full or closed delivery channels drop the message; the
    /// subscriber stays registered.
    fn finalize(&mut self, seq: u32) {
        let Some(mut partial) = self.index.remove(seq) else {
            return;
        };
        partial.stage = FetchStage::Full;

        let Some(message) = DeliveredMessage::from_partial(seq, &partial) else {
            tracing::warn!(seq, "body structure missing at delivery; dropping");
            return;
        };

        let mut delivered = 0usize;
        for subscriber in &self.subscribers {
            if !subscriber.filter.accepts(&partial) {
                continue;
            }
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::debug!(
                    id = subscriber.id.0,
                    seq,
                    "delivery channel full or closed; message dropped"
                ),
            }
        }
        tracing::debug!(seq, delivered, "message processed");
    }

    // === wire helpers ===

    async fn send_login(&mut self) -> Result<()> {
        self.phase = Phase::LoggingIn;
        let username = self.config.username.clone();
        // The password leaves the session here; only the command buffer holds
        // it, and that is dropped as soon as the bytes are written.
        let password = std::mem::take(&mut self.config.password);
        self.send(Command::Login { username, password }, TagKind::Login)
            .await
    }

    async fn send(&mut self, command: Command, kind: TagKind) -> Result<()> {
        let tag = self.tags.next();
        let name = command.name();

        let bytes = match command.serialize(tag) {
            Ok(bytes) => bytes,
            Err(error) => {
                // A user command with an unsendable argument fails its caller,
                // not the session.
                tracing::warn!(command = name, %error, "refusing to serialize command");
                return match kind {
                    TagKind::List { .. } | TagKind::Create { .. } | TagKind::Copy { .. } => {
                        fail_kind_with(kind, error);
                        Ok(())
                    }
                    _ => Err(error),
                };
            }
        };

        self.table.insert(tag, name, kind);
        self.in_flight += 1;
        tracing::trace!(tag, command = name, "sending command");
        self.write(&bytes).await
    }

    async fn write_done(&mut self) -> Result<()> {
        self.idle = IdleState::CancelRequested;
        let bytes = Command::Done.serialize(0)?;
        self.write(&bytes).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::ConnectionLost("transport closed".to_string()))?
            .write_command(bytes)
            .await
    }
}

fn status_error(status: Status, text: String) -> Error {
    match status {
        Status::No => Error::No(text),
        Status::Bad | Status::Ok => Error::Bad(text),
    }
}

/// Resolves a user command's reply channel with a terminal error.
fn fail_kind(kind: TagKind) {
    fail_kind_with(
        kind,
        Error::ConnectionLost("session shutting down".to_string()),
    );
}

fn fail_kind_with(kind: TagKind, error: Error) {
    match kind {
        TagKind::List { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        TagKind::Create { reply } => {
            let _ = reply.send(Err(error));
        }
        TagKind::Copy { reply, .. } => {
            let _ = reply.send(Err(error));
        }
        _ => {}
    }
}
