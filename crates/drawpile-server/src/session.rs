//! Session actor
//!
//! Each session runs as one task that exclusively owns its canvas state,
//! log, client list and ban list. Connections talk to it through a
//! [`SessionHandle`]; everything the actor does for one event (validate,
//! apply, append, broadcast) happens before it looks at the next event, so
//! the session behaves as a single serialization point.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drawpile_canvas::{CanvasState, CanvasSummary};
use drawpile_msg::{
    join_flags, ClientRequest, Command, DisconnectReason, Message, MessageType, ServerReply,
    MAX_USER_CONTEXT,
};
use drawpile_record::RecordingSink;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::events::{EventLog, ServerEvent};
use crate::log::{PresentUser, SeqNum, SessionLog};

/// Pending events per session
const EVENT_QUEUE_LEN: usize = 1024;

/// Items queued for a client's writer task
#[derive(Debug, Clone)]
pub enum Outbound {
    /// One message
    Message(Message),
    /// Several messages written back to back
    Batch(Vec<Message>),
    /// Send a disconnect notice and close the connection
    Close {
        /// Reason code
        reason: DisconnectReason,
        /// Explanation
        message: String,
    },
}

/// A client asking to join
#[derive(Debug)]
pub struct JoinRequest {
    /// Display name
    pub name: String,
    /// Peer address
    pub addr: IpAddr,
    /// `Join` flags
    pub flags: u8,
    /// Grant operator status on join
    pub operator: bool,
    /// Session password supplied by the client
    pub password: Option<String>,
    /// The client's outbound queue
    pub outbox: mpsc::Sender<Outbound>,
    /// Cancelled once the session drops this client
    pub dropped: CancellationToken,
}

/// Result of a successful join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    /// Assigned context id
    pub context_id: u8,
    /// First live sequence number after the catch-up
    pub resume_at: SeqNum,
    /// Identifies this membership; events from an earlier holder of the
    /// same context id are ignored
    pub connection: Uuid,
}

/// A session ban
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionBan {
    /// Banned address
    pub address: IpAddr,
    /// Name of the banned user
    pub name: String,
    /// Context id of the operator who banned, 0 for the server
    pub banned_by: u8,
}

/// Connected user, as reported by status queries
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    /// Context id
    pub context_id: u8,
    /// Display name
    pub name: String,
    /// Peer address
    pub address: String,
    /// Session operator
    pub operator: bool,
    /// Logged in with an account
    pub registered: bool,
    /// Locked by an operator
    pub locked: bool,
    /// Undo points the user has set
    pub undo_points: u32,
    /// Commands since the user's latest undo point
    pub undo_group: usize,
    /// When the user joined
    pub joined_at: DateTime<Utc>,
}

/// Session status
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id
    pub id: String,
    /// Title
    pub title: String,
    /// Whether a session password is set
    pub has_password: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Connected users in join order
    pub users: Vec<UserInfo>,
    /// Number of logged messages
    pub log_length: u64,
    /// Recording file, if recording
    pub recording: Option<PathBuf>,
    /// Canvas summary
    pub canvas: CanvasSummary,
    /// Session bans
    pub bans: Vec<SessionBan>,
}

/// Session settings changed through the admin interface
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    /// New title
    #[serde(default)]
    pub title: Option<String>,
    /// New password, empty to remove it
    #[serde(default)]
    pub password: Option<String>,
}

/// Everything needed to start a session
pub struct SessionSettings {
    /// Session id
    pub id: String,
    /// Title
    pub title: String,
    /// Session password
    pub password: Option<String>,
    /// User limit
    pub max_users: usize,
    /// Messages replayed into the new session, e.g. from a template
    pub history: Vec<Message>,
    /// Recording destination
    pub sink: Option<Box<dyn RecordingSink>>,
    /// Recording file path, for status queries
    pub recording: Option<PathBuf>,
}

impl SessionSettings {
    /// Settings for an empty session
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            password: None,
            max_users: usize::from(MAX_USER_CONTEXT),
            history: Vec::new(),
            sink: None,
            recording: None,
        }
    }
}

enum SessionEvent {
    Join {
        request: JoinRequest,
        reply: oneshot::Sender<Result<Joined>>,
    },
    Inbound {
        ctx: u8,
        connection: Uuid,
        message: Message,
    },
    Leave {
        ctx: u8,
        connection: Uuid,
    },
    Kick {
        target: u8,
        ban: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Update {
        update: SessionUpdate,
        reply: oneshot::Sender<SessionInfo>,
    },
    Info {
        reply: oneshot::Sender<SessionInfo>,
    },
    Terminate,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    instance: Uuid,
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Unique id of this session instance
    #[must_use]
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Whether the actor has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, event: SessionEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| Error::SessionClosed)
    }

    /// Join the session
    pub async fn join(&self, request: JoinRequest) -> Result<Joined> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Join { request, reply }).await?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Submit a message from a joined client
    pub async fn submit(&self, member: &Joined, message: Message) -> Result<()> {
        self.send(SessionEvent::Inbound {
            ctx: member.context_id,
            connection: member.connection,
            message,
        })
        .await
    }

    /// Report that a joined client disconnected
    pub async fn leave(&self, member: &Joined) {
        let _ = self
            .send(SessionEvent::Leave {
                ctx: member.context_id,
                connection: member.connection,
            })
            .await;
    }

    /// Remove a user, optionally banning their address
    pub async fn kick(&self, target: u8, ban: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Kick { target, ban, reply }).await?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Change session settings
    pub async fn update(&self, update: SessionUpdate) -> Result<SessionInfo> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Update { update, reply }).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Current status
    pub async fn info(&self) -> Result<SessionInfo> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Info { reply }).await?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Disconnect everyone and close the session
    pub async fn terminate(&self) {
        let _ = self.send(SessionEvent::Terminate).await;
    }
}

struct Client {
    ctx: u8,
    connection: Uuid,
    dropped: CancellationToken,
    name: String,
    addr: IpAddr,
    flags: u8,
    outbox: mpsc::Sender<Outbound>,
    joined_at: DateTime<Utc>,
}

/// Session actor state
pub struct Session {
    id: String,
    title: String,
    password: Option<String>,
    max_users: usize,
    created_at: DateTime<Utc>,
    canvas: CanvasState,
    log: SessionLog,
    recording: Option<PathBuf>,
    clients: Vec<Client>,
    bans: Vec<SessionBan>,
    dropped: Vec<u8>,
    has_joined: bool,
    events: Arc<EventLog>,
}

impl Session {
    /// Start a session actor
    ///
    /// The task ends when the last client leaves, when it is terminated, or
    /// when `token` is cancelled.
    pub fn spawn(
        settings: SessionSettings,
        events: Arc<EventLog>,
        token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let handle = SessionHandle {
            id: settings.id.clone(),
            instance: Uuid::new_v4(),
            tx,
        };
        let session = Self::new(settings, events);
        let task = tokio::spawn(session.run(rx, token));
        (handle, task)
    }

    fn new(settings: SessionSettings, events: Arc<EventLog>) -> Self {
        let mut log = SessionLog::new();
        if let Some(sink) = settings.sink {
            log = log.with_sink(sink);
        }
        let mut session = Self {
            id: settings.id,
            title: settings.title,
            password: settings.password.filter(|p| !p.is_empty()),
            max_users: settings.max_users.min(usize::from(MAX_USER_CONTEXT)),
            created_at: Utc::now(),
            canvas: CanvasState::new(),
            log,
            recording: settings.recording,
            clients: Vec::new(),
            bans: Vec::new(),
            dropped: Vec::new(),
            has_joined: false,
            events,
        };
        session.replay_history(settings.history);
        session
    }

    /// Load messages from a template, keeping only canvas and session state
    fn replay_history(&mut self, history: Vec<Message>) {
        let mut skipped = 0usize;
        for message in history {
            let keep = match message.message_type() {
                MessageType::Join
                | MessageType::Leave
                | MessageType::SessionOwner
                | MessageType::UserAcl
                | MessageType::PrivateChat
                | MessageType::LayerVisibility => false,
                kind => !kind.is_control(),
            };
            if !keep {
                continue;
            }
            match self.canvas.apply(&message) {
                Ok(()) => {
                    self.log.append(&message);
                }
                Err(e) => {
                    skipped += 1;
                    debug!(session = %self.id, error = %e, "skipping template message");
                }
            }
        }
        if skipped > 0 {
            warn!(session = %self.id, skipped, "template messages did not apply");
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>, token: CancellationToken) {
        info!(session = %self.id, title = %self.title, "Session started");
        self.events
            .push(ServerEvent::info(format!("session started: {}", self.title)).session(&self.id));

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => {
                    self.close_all(DisconnectReason::Shutdown, "server shutting down");
                    break;
                }
                event = rx.recv() => event,
            };
            let Some(event) = event else { break };

            if !self.handle(event) {
                break;
            }
            self.reap();

            if self.has_joined && self.clients.is_empty() {
                break;
            }
        }

        self.log.flush();
        info!(session = %self.id, log_length = self.log.len(), "Session closed");
        self.events
            .push(ServerEvent::info("session closed").session(&self.id));
    }

    /// Process one event; returns false when the session should stop
    fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Join { request, reply } => {
                let _ = reply.send(self.join(request));
            }
            SessionEvent::Inbound {
                ctx,
                connection,
                message,
            } => {
                if self.is_member(ctx, connection) {
                    self.inbound(ctx, message);
                } else {
                    debug!(session = %self.id, ctx, "ignoring message from a dropped connection");
                }
            }
            SessionEvent::Leave { ctx, connection } => {
                if self.is_member(ctx, connection) {
                    self.remove_client(ctx, "disconnected");
                }
            }
            SessionEvent::Kick { target, ban, reply } => {
                let _ = reply.send(self.kick(target, ban, 0));
            }
            SessionEvent::Update { update, reply } => {
                if let Some(title) = update.title {
                    self.title = title;
                }
                if let Some(password) = update.password {
                    self.password = Some(password).filter(|p| !p.is_empty());
                }
                let _ = reply.send(self.info());
            }
            SessionEvent::Info { reply } => {
                let _ = reply.send(self.info());
            }
            SessionEvent::Terminate => {
                self.events
                    .push(ServerEvent::warn("session terminated").session(&self.id));
                self.close_all(DisconnectReason::Shutdown, "session terminated");
                return false;
            }
        }
        true
    }

    fn join(&mut self, request: JoinRequest) -> Result<Joined> {
        let moderator = request.flags & join_flags::MODERATOR != 0;
        if !moderator && self.bans.iter().any(|b| b.address == request.addr) {
            return Err(Error::rejected("banned", "you are banned from this session"));
        }
        if !moderator && !request.operator {
            if let Some(password) = &self.password {
                if request.password.as_deref() != Some(password.as_str()) {
                    return Err(Error::rejected("bad_password", "incorrect session password"));
                }
            }
        }
        if self.clients.len() >= self.max_users {
            return Err(Error::rejected("session_full", "session is full"));
        }
        let ctx = (1..=MAX_USER_CONTEXT)
            .find(|c| !self.clients.iter().any(|client| client.ctx == *c))
            .ok_or_else(|| Error::rejected("session_full", "no free user ids"))?;

        self.commit(
            Message::new(
                ctx,
                Command::Join {
                    flags: request.flags,
                    name: request.name.clone(),
                    avatar: Vec::new(),
                },
            ),
            None,
        )?;
        if request.operator || moderator {
            let mut users: Vec<u8> = self.canvas.acl().operators().iter().copied().collect();
            users.push(ctx);
            self.commit(Message::server(Command::SessionOwner { users }), None)?;
        }

        // catch-up and joining the broadcast set happen in this same step
        let mut present: Vec<PresentUser> = self
            .clients
            .iter()
            .map(|c| PresentUser {
                context_id: c.ctx,
                flags: c.flags,
                name: c.name.clone(),
            })
            .collect();
        present.push(PresentUser {
            context_id: ctx,
            flags: request.flags,
            name: request.name.clone(),
        });
        let catch_up = self.log.catch_up(&self.canvas, &present);

        let mut batch = Vec::with_capacity(catch_up.messages.len() + 2);
        batch.push(
            ServerReply::Welcome {
                session: self.id.clone(),
                context_id: ctx,
                title: self.title.clone(),
            }
            .to_message(),
        );
        batch.push(
            ServerReply::CatchUp {
                count: catch_up.messages.len(),
            }
            .to_message(),
        );
        batch.extend(catch_up.messages);

        if request.outbox.try_send(Outbound::Batch(batch)).is_err() {
            self.dropped.push(ctx);
        }
        let connection = Uuid::new_v4();
        self.clients.push(Client {
            ctx,
            connection,
            dropped: request.dropped,
            name: request.name.clone(),
            addr: request.addr,
            flags: request.flags,
            outbox: request.outbox,
            joined_at: Utc::now(),
        });
        self.has_joined = true;

        info!(session = %self.id, ctx, name = %request.name, addr = %request.addr, "User joined");
        self.events.push(
            ServerEvent::info(format!("{} joined from {}", request.name, request.addr))
                .session(&self.id)
                .user(ctx),
        );

        Ok(Joined {
            context_id: ctx,
            resume_at: catch_up.resume_at,
            connection,
        })
    }

    fn is_member(&self, ctx: u8, connection: Uuid) -> bool {
        self.clients
            .iter()
            .any(|c| c.ctx == ctx && c.connection == connection)
    }

    fn inbound(&mut self, ctx: u8, mut message: Message) {
        if !self.clients.iter().any(|c| c.ctx == ctx) {
            return;
        }
        message.context_id = ctx;

        match &message.command {
            Command::ServerCommand { .. } => self.server_command(ctx, &message.command),
            Command::Ping { is_pong: false } => {
                self.send_to(ctx, Message::server(Command::Ping { is_pong: true }));
            }
            Command::Ping { is_pong: true } => {}
            Command::Disconnect { .. } => self.remove_client(ctx, "disconnected"),
            Command::LayerVisibility { .. } => {
                debug!(session = %self.id, ctx, "ignoring local-only command");
            }
            Command::PrivateChat { target, .. } => {
                let target = *target;
                if let Err(e) = self.canvas.check(ctx, &message.command) {
                    self.reply_error(ctx, &Error::from(e));
                } else if target != ctx {
                    self.send_to(target, message);
                }
            }
            _ => {
                if let Err(e) = self.accept(message) {
                    debug!(session = %self.id, ctx, error = %e, "command rejected");
                    self.reply_error(ctx, &e);
                }
            }
        }
    }

    /// Validate, apply, log and broadcast a client command
    fn accept(&mut self, message: Message) -> Result<SeqNum> {
        self.canvas.check(message.context_id, &message.command)?;
        let except = message.context_id;
        self.commit(message, Some(except))
    }

    /// Apply, log and broadcast a message that is already authorized
    fn commit(&mut self, message: Message, except: Option<u8>) -> Result<SeqNum> {
        self.canvas.apply(&message)?;
        let seq = self.log.append(&message);
        self.broadcast(&message, except);
        Ok(seq)
    }

    fn server_command(&mut self, ctx: u8, command: &Command) {
        let request = match ClientRequest::from_command(command) {
            Some(Ok(request)) => request,
            Some(Err(e)) => {
                self.reply_error(ctx, &Error::BadRequest(e.to_string()));
                return;
            }
            None => return,
        };

        match request {
            ClientRequest::Login { .. } => {
                self.reply_error(ctx, &Error::BadRequest("already logged in".to_string()));
            }
            ClientRequest::Kick { target, ban } => {
                if !self.canvas.acl().is_operator(ctx) {
                    self.reply_error(ctx, &Error::Acl(drawpile_canvas::AclError::NotOperator));
                } else if let Err(e) = self.kick(target, ban, ctx) {
                    self.reply_error(ctx, &e);
                }
            }
        }
    }

    fn kick(&mut self, target: u8, ban: bool, by: u8) -> Result<()> {
        let client = self
            .clients
            .iter()
            .find(|c| c.ctx == target)
            .ok_or_else(|| Error::BadRequest(format!("no user {target}")))?;
        let (name, addr) = (client.name.clone(), client.addr);

        let _ = client.outbox.try_send(Outbound::Close {
            reason: DisconnectReason::Kick,
            message: "kicked by an operator".to_string(),
        });
        if ban && !self.bans.iter().any(|b| b.address == addr) {
            self.bans.push(SessionBan {
                address: addr,
                name: name.clone(),
                banned_by: by,
            });
        }

        warn!(session = %self.id, target, by, ban, "User kicked");
        let action = if ban { "kicked and banned" } else { "kicked" };
        self.events.push(
            ServerEvent::warn(format!("{name} ({addr}) {action} by {by}"))
                .session(&self.id)
                .user(target),
        );
        self.remove_client(target, action);
        Ok(())
    }

    fn remove_client(&mut self, ctx: u8, why: &str) {
        let Some(pos) = self.clients.iter().position(|c| c.ctx == ctx) else {
            return;
        };
        let client = self.clients.remove(pos);
        client.dropped.cancel();
        info!(session = %self.id, ctx, name = %client.name, reason = why, "User left");
        self.events.push(
            ServerEvent::info(format!("{} left ({why})", client.name))
                .session(&self.id)
                .user(ctx),
        );
        if let Err(e) = self.commit(Message::new(ctx, Command::Leave), None) {
            warn!(session = %self.id, ctx, error = %e, "leave did not apply");
        }
    }

    /// Remove clients whose queues overflowed or closed
    fn reap(&mut self) {
        while let Some(ctx) = self.dropped.pop() {
            if self.clients.iter().any(|c| c.ctx == ctx) {
                warn!(session = %self.id, ctx, "Outbound queue full or closed, dropping client");
                self.remove_client(ctx, "connection lost");
            }
        }
    }

    fn broadcast(&mut self, message: &Message, except: Option<u8>) {
        for client in &self.clients {
            if Some(client.ctx) == except {
                continue;
            }
            if client
                .outbox
                .try_send(Outbound::Message(message.clone()))
                .is_err()
            {
                self.dropped.push(client.ctx);
            }
        }
    }

    fn send_to(&mut self, ctx: u8, message: Message) {
        if let Some(client) = self.clients.iter().find(|c| c.ctx == ctx) {
            if client.outbox.try_send(Outbound::Message(message)).is_err() {
                self.dropped.push(ctx);
            }
        }
    }

    fn reply_error(&mut self, ctx: u8, error: &Error) {
        let reply = ServerReply::error(error.code(), error.to_string());
        self.send_to(ctx, reply.to_message());
    }

    fn close_all(&mut self, reason: DisconnectReason, message: &str) {
        for client in self.clients.drain(..) {
            let _ = client.outbox.try_send(Outbound::Close {
                reason,
                message: message.to_string(),
            });
            client.dropped.cancel();
        }
    }

    fn info(&self) -> SessionInfo {
        let acl = self.canvas.acl();
        SessionInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            has_password: self.password.is_some(),
            created_at: self.created_at,
            users: self
                .clients
                .iter()
                .map(|c| UserInfo {
                    context_id: c.ctx,
                    name: c.name.clone(),
                    address: c.addr.to_string(),
                    operator: acl.is_operator(c.ctx),
                    registered: c.flags & join_flags::AUTHENTICATED != 0,
                    locked: acl.is_locked(c.ctx),
                    undo_points: self.canvas.undo_points(c.ctx),
                    undo_group: self.log.undo_group(c.ctx).len(),
                    joined_at: c.joined_at,
                })
                .collect(),
            log_length: self.log.len(),
            recording: self.recording.clone(),
            canvas: self.canvas.summary(),
            bans: self.bans.clone(),
        }
    }
}
