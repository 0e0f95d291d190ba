//! Session server
//!
//! Accepts TCP connections, checks bans, performs the login handshake and
//! binds each client to a session actor. Sessions live in a registry owned
//! by the [`Server`]; a session removes itself when its actor stops.
//!
//! Per connection, a reader task decodes inbound frames and submits them to
//! the session, and a writer task drains the client's bounded outbound
//! queue onto the socket. Neither touches session state.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use drawpile_msg::{
    join_flags, ClientRequest, Command, DisconnectReason, Message, ServerReply,
};
use drawpile_record::{
    create_file, read_file, BackgroundRecorder, RecordingFormat, RecordingHeader, RecordingSink,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admin::AdminResponse;
use crate::codec::MessageCodec;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::events::{EventLog, ServerEvent};
use crate::session::{
    JoinRequest, Joined, Outbound, Session, SessionHandle, SessionInfo, SessionSettings,
};
use crate::shutdown::ShutdownController;
use crate::store::{AccountCheck, ServerStore};

type ClientSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;

/// Longest accepted session id
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Longest accepted user name, in bytes
pub const MAX_USERNAME_LEN: usize = 255;

/// Whether a string is usable as a session id
#[must_use]
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Server status
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Server start time
    pub started_at: DateTime<Utc>,
    /// Open sessions
    pub sessions: usize,
    /// Connected clients
    pub connections: u32,
    /// Auto-stop enabled
    pub auto_stop: bool,
    /// Shutdown in progress
    pub shutting_down: bool,
}

struct LoggedIn {
    handle: SessionHandle,
    joined: Joined,
    outbox: mpsc::WeakSender<Outbound>,
    rx: mpsc::Receiver<Outbound>,
    dropped: CancellationToken,
}

/// The session server
pub struct Server {
    config: ServerConfig,
    store: ServerStore,
    sessions: DashMap<String, SessionHandle>,
    events: Arc<EventLog>,
    shutdown: Arc<ShutdownController>,
    started_at: DateTime<Utc>,
    pub(crate) admin_tx: broadcast::Sender<AdminResponse>,
}

impl Server {
    /// Create a server
    #[must_use]
    pub fn new(config: ServerConfig, store: ServerStore, shutdown: Arc<ShutdownController>) -> Arc<Self> {
        let (admin_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            events: Arc::new(EventLog::new(config.event_log_capacity)),
            config,
            store,
            sessions: DashMap::new(),
            shutdown,
            started_at: Utc::now(),
            admin_tx,
        })
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Ban and account store
    #[must_use]
    pub fn store(&self) -> &ServerStore {
        &self.store
    }

    /// Server event log
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Shutdown controller
    #[must_use]
    pub fn shutdown_controller(&self) -> &Arc<ShutdownController> {
        &self.shutdown
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            started_at: self.started_at,
            sessions: self.sessions.len(),
            connections: self.shutdown.connection_count(),
            auto_stop: self.config.auto_stop,
            shutting_down: self.shutdown.is_shutting_down(),
        }
    }

    /// Look up a running session
    #[must_use]
    pub fn session(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|h| h.clone())
    }

    /// Status of every running session
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|h| h.clone()).collect();
        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(info) = handle.info().await {
                infos.push(info);
            }
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Bind the listener and start accepting clients
    pub async fn start(self: &Arc<Self>) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "Session server listening");
        self.events
            .push(ServerEvent::info(format!("server started on {addr}")));
        let server = Arc::clone(self);
        Ok((addr, tokio::spawn(server.accept_loop(listener))))
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let token = self.shutdown.token();
        loop {
            let accepted = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    let guard = self.shutdown.register_connection();
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            debug!(%addr, error = %e, "Connection ended with error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            }
        }
        info!("Listener stopped");
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let ip = addr.ip();
        let mut framed = Framed::new(stream, MessageCodec);

        if let Some(ban) = self.store.find_ban(ip).await? {
            info!(%addr, ban = %ban.address, "Rejected banned address");
            self.events
                .push(ServerEvent::warn(format!("rejected banned address {ip}")));
            reject(&mut framed, &Error::rejected("banned", "you are banned from this server")).await;
            return Ok(());
        }

        let timeout = Duration::from_secs(self.config.login_timeout_secs);
        let first = match tokio::time::timeout(timeout, framed.next()).await {
            Err(_) => {
                reject(&mut framed, &Error::rejected("timeout", "login timed out")).await;
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(Err(e)))) => {
                reject(&mut framed, &Error::Codec(e)).await;
                return Ok(());
            }
            Ok(Some(Ok(Ok(message)))) => message,
        };

        let logged_in = match ClientRequest::from_command(&first.command) {
            Some(Ok(request @ ClientRequest::Login { .. })) => self.login(ip, request).await,
            _ => Err(Error::rejected("login_required", "expected a login request")),
        };
        let logged_in = match logged_in {
            Ok(logged_in) => logged_in,
            Err(e) => {
                info!(%addr, code = e.code(), error = %e, "Login rejected");
                reject(&mut framed, &e).await;
                return Ok(());
            }
        };

        self.serve_client(framed, addr, logged_in).await;
        Ok(())
    }

    async fn login(self: &Arc<Self>, ip: IpAddr, request: ClientRequest) -> Result<LoggedIn> {
        let ClientRequest::Login {
            session,
            username,
            password,
            session_password,
            create,
            title,
        } = request
        else {
            return Err(Error::rejected("login_required", "expected a login request"));
        };

        let username = username.trim().to_string();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(Error::rejected("bad_username", "invalid user name"));
        }
        if !is_valid_session_id(&session) {
            return Err(Error::rejected("bad_session_id", "invalid session id"));
        }

        let flags = match self.store.check_login(&username, password.as_deref()).await? {
            AccountCheck::NoAccount => 0,
            AccountCheck::Ok(account) => {
                let mut flags = join_flags::AUTHENTICATED;
                if account.moderator {
                    flags |= join_flags::MODERATOR;
                }
                flags
            }
            AccountCheck::BadPassword => {
                return Err(Error::rejected("bad_account_password", "incorrect account password"))
            }
            AccountCheck::Locked => {
                return Err(Error::rejected("account_locked", "this account is locked"))
            }
        };

        // a session that closes between lookup and join is opened again
        for _ in 0..2 {
            let (handle, created) = self
                .open_session(&session, create, title.clone(), session_password.clone())
                .await?;
            let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
            let outbox = tx.downgrade();
            let dropped = CancellationToken::new();
            let request = JoinRequest {
                name: username.clone(),
                addr: ip,
                flags,
                operator: created,
                password: session_password.clone(),
                outbox: tx,
                dropped: dropped.clone(),
            };
            match handle.join(request).await {
                Ok(joined) => {
                    return Ok(LoggedIn {
                        handle,
                        joined,
                        outbox,
                        rx,
                        dropped,
                    })
                }
                Err(Error::SessionClosed) => {
                    self.sessions
                        .remove_if(&session, |_, h| h.instance() == handle.instance());
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::SessionClosed)
    }

    /// Find a session, creating it or loading its template when missing
    async fn open_session(
        self: &Arc<Self>,
        id: &str,
        create: bool,
        title: Option<String>,
        password: Option<String>,
    ) -> Result<(SessionHandle, bool)> {
        if let Some(handle) = self.session(id) {
            if !handle.is_closed() {
                return Ok((handle, false));
            }
        }
        if self.shutdown.is_shutting_down() {
            return Err(Error::rejected("shutting_down", "server is shutting down"));
        }
        if self.sessions.len() >= self.config.max_sessions {
            return Err(Error::rejected("too_many_sessions", "session limit reached"));
        }

        let history = if create {
            if !self.config.allow_session_creation {
                return Err(Error::rejected("creation_disabled", "session creation is disabled"));
            }
            Vec::new()
        } else {
            match self.load_template(id).await? {
                Some(history) => history,
                None => return Err(Error::SessionNotFound(id.to_string())),
            }
        };

        let handle = match self.sessions.entry(id.to_string()) {
            Entry::Occupied(entry) if !entry.get().is_closed() => return Ok((entry.get().clone(), false)),
            entry => {
                let mut settings = SessionSettings::new(id, title.unwrap_or_else(|| id.to_string()));
                settings.password = password;
                settings.max_users = self.config.max_users;
                settings.history = history;
                if let Some((path, sink)) = self.open_recording(id) {
                    settings.recording = Some(path);
                    settings.sink = Some(sink);
                }
                let (handle, task) =
                    Session::spawn(settings, Arc::clone(&self.events), self.shutdown.token());
                match entry {
                    Entry::Occupied(mut entry) => {
                        entry.insert(handle.clone());
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(handle.clone());
                    }
                }
                let server = Arc::clone(self);
                let (session_id, instance) = (id.to_string(), handle.instance());
                tokio::spawn(async move {
                    if let Err(e) = task.await {
                        error!(session = %session_id, error = %e, "Session task failed");
                    }
                    server.session_closed(&session_id, instance).await;
                });
                handle
            }
        };

        info!(session = %id, create, "Session opened");
        Ok((handle, true))
    }

    async fn load_template(&self, id: &str) -> Result<Option<Vec<Message>>> {
        let Some(dir) = &self.config.template_dir else {
            return Ok(None);
        };
        for format in [RecordingFormat::Binary, RecordingFormat::Text] {
            let path = dir.join(format!("{id}.{}", format.extension()));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                let recording = read_file(&path).await?;
                if recording.truncated {
                    warn!(path = %path.display(), "Template recording is truncated");
                }
                info!(session = %id, path = %path.display(), messages = recording.messages.len(), "Loaded template");
                return Ok(Some(recording.messages));
            }
        }
        Ok(None)
    }

    fn open_recording(&self, id: &str) -> Option<(PathBuf, Box<dyn RecordingSink>)> {
        let dir = self.config.recording_dir.as_ref()?;
        let header = RecordingHeader::new(id);
        match create_file(dir, self.config.recording_format, &header) {
            Ok((path, writer)) => {
                info!(session = %id, path = %path.display(), "Recording session");
                Some((path, Box::new(BackgroundRecorder::spawn(writer))))
            }
            Err(e) => {
                warn!(session = %id, error = %e, "Could not start recording");
                None
            }
        }
    }

    async fn session_closed(&self, id: &str, instance: Uuid) {
        self.sessions.remove_if(id, |_, h| h.instance() == instance);
        debug!(session = %id, remaining = self.sessions.len(), "Session removed");

        if self.config.auto_stop && self.sessions.is_empty() && !self.shutdown.is_shutting_down() {
            info!("Last session closed, auto-stopping");
            self.events.push(ServerEvent::info("auto-stop"));
            self.shutdown.shutdown().await;
        }
    }

    async fn serve_client(&self, framed: Framed<TcpStream, MessageCodec>, addr: SocketAddr, logged_in: LoggedIn) {
        let LoggedIn {
            handle,
            joined,
            outbox,
            rx,
            dropped,
        } = logged_in;
        let ctx = joined.context_id;
        debug!(%addr, session = %handle.id(), ctx, resume_at = joined.resume_at, "Client joined");

        // cancelled by the session when it drops this client, or by the writer
        let closed = dropped;
        let (sink, mut stream) = framed.split();
        let write_timeout = Duration::from_secs(self.config.write_timeout_secs.max(1));
        let mut writer = tokio::spawn(write_loop(sink, rx, closed.clone(), write_timeout));

        let mut errors = 0u32;
        loop {
            let next = tokio::select! {
                _ = closed.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Ok(message))) => {
                    if handle.submit(&joined, message).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Err(e))) => {
                    errors += 1;
                    warn!(%addr, ctx, errors, error = %e, "Malformed message");
                    let reply = ServerReply::error(e.code(), e.to_string()).to_message();
                    if let Some(tx) = outbox.upgrade() {
                        let _ = tx.try_send(Outbound::Message(reply));
                        if errors >= self.config.max_decode_errors {
                            let _ = tx.try_send(Outbound::Close {
                                reason: DisconnectReason::Error,
                                message: "too many malformed messages".to_string(),
                            });
                        }
                    }
                    if errors >= self.config.max_decode_errors {
                        self.events.push(
                            ServerEvent::warn(format!("{addr} dropped after {errors} malformed messages"))
                                .session(handle.id())
                                .user(ctx),
                        );
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(%addr, ctx, error = %e, "Read failed");
                    break;
                }
                None => break,
            }
        }

        handle.leave(&joined).await;
        if tokio::time::timeout(Duration::from_secs(5), &mut writer).await.is_err() {
            debug!(%addr, ctx, "Writer did not finish in time");
            writer.abort();
        }
    }
}

async fn write_loop(
    mut sink: ClientSink,
    mut rx: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
    write_timeout: Duration,
) {
    while let Some(item) = rx.recv().await {
        let last = matches!(item, Outbound::Close { .. });
        match tokio::time::timeout(write_timeout, write_item(&mut sink, item)).await {
            Ok(Ok(())) if !last => {}
            Ok(Ok(())) => break,
            Ok(Err(e)) => {
                debug!(error = %e, "Write failed");
                break;
            }
            Err(_) => {
                debug!("Write timed out, client is not reading");
                break;
            }
        }
    }
    closed.cancel();
    let _ = tokio::time::timeout(write_timeout, sink.close()).await;
}

async fn write_item(sink: &mut ClientSink, item: Outbound) -> std::io::Result<()> {
    match item {
        Outbound::Message(message) => sink.send(message).await,
        Outbound::Batch(batch) => {
            for message in batch {
                sink.feed(message).await?;
            }
            sink.flush().await
        }
        Outbound::Close { reason, message } => {
            sink.send(Message::server(Command::Disconnect { reason, message }))
                .await
        }
    }
}

async fn reject(framed: &mut Framed<TcpStream, MessageCodec>, error: &Error) {
    let message = match error {
        Error::Rejected { message, .. } => message.clone(),
        other => other.to_string(),
    };
    let _ = framed
        .send(ServerReply::rejected(error.code(), message.clone()).to_message())
        .await;
    let _ = framed
        .send(Message::server(Command::Disconnect {
            reason: DisconnectReason::Error,
            message,
        }))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_validation() {
        assert!(is_valid_session_id("sketch-01_b"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("has space"));
        assert!(!is_valid_session_id("dots.are.bad"));
        assert!(!is_valid_session_id(&"x".repeat(MAX_SESSION_ID_LEN + 1)));
    }
}
