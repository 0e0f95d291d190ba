//! Session log and catch-up
//!
//! The log numbers every accepted message and hands it to the recording
//! sink, if there is one. A joining client never sees the history itself:
//! [`SessionLog::catch_up`] builds a compact reconstruction from the canvas
//! state, and live delivery resumes at [`CatchUp::resume_at`].

use std::collections::{HashMap, VecDeque};

use drawpile_canvas::CanvasState;
use drawpile_msg::{Command, Message};
use drawpile_record::RecordingSink;
use tracing::{debug, warn};

/// Position of a message in the session log, starting at 1
pub type SeqNum = u64;

/// Most messages kept per user for [`SessionLog::undo_group`]
pub const MAX_UNDO_GROUP: usize = 1024;

/// A user present in the session, as needed for catch-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentUser {
    /// Context id
    pub context_id: u8,
    /// `Join` flags
    pub flags: u8,
    /// Display name
    pub name: String,
}

/// Catch-up for a joining client
#[derive(Debug, Clone)]
pub struct CatchUp {
    /// Messages that rebuild the current state
    pub messages: Vec<Message>,
    /// Sequence number of the first live message the joiner will receive
    pub resume_at: SeqNum,
}

/// Authoritative ordered log of one session
pub struct SessionLog {
    next: SeqNum,
    sink: Option<Box<dyn RecordingSink>>,
    groups: HashMap<u8, VecDeque<Message>>,
}

impl SessionLog {
    /// Create an empty log without persistence
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: 1,
            sink: None,
            groups: HashMap::new(),
        }
    }

    /// Attach a recording sink
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn RecordingSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Number of messages appended so far
    #[must_use]
    pub fn len(&self) -> u64 {
        self.next - 1
    }

    /// Whether nothing has been appended yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next == 1
    }

    /// Sequence number the next message will get
    #[must_use]
    pub fn next_seq(&self) -> SeqNum {
        self.next
    }

    /// Whether messages are being recorded
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.sink.is_some()
    }

    /// Append an accepted message
    ///
    /// Persistence is best effort. The first sink failure detaches the sink
    /// and the message is still numbered and delivered.
    pub fn append(&mut self, message: &Message) -> SeqNum {
        let seq = self.next;
        self.next += 1;

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write(message) {
                warn!(seq, error = %e, "recording failed, detaching sink");
                self.sink = None;
            }
        }

        self.track_undo(message);
        seq
    }

    /// Flush the recording sink
    pub fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush() {
                warn!(error = %e, "recording flush failed, detaching sink");
                self.sink = None;
            }
        }
    }

    /// Catch-up for a joining client
    ///
    /// One `Join` per present user followed by the canvas snapshot.
    #[must_use]
    pub fn catch_up(&self, canvas: &CanvasState, users: &[PresentUser]) -> CatchUp {
        let mut messages: Vec<Message> = users
            .iter()
            .map(|user| {
                Message::new(
                    user.context_id,
                    Command::Join {
                        flags: user.flags,
                        name: user.name.clone(),
                        avatar: Vec::new(),
                    },
                )
            })
            .collect();
        messages.extend(canvas.snapshot());
        debug!(count = messages.len(), resume_at = self.next, "catch-up built");
        CatchUp {
            messages,
            resume_at: self.next,
        }
    }

    /// Canvas commands a user sent since their latest undo point
    #[must_use]
    pub fn undo_group(&self, ctx: u8) -> Vec<Message> {
        self.groups
            .get(&ctx)
            .map(|group| group.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn track_undo(&mut self, message: &Message) {
        match &message.command {
            Command::UndoPoint => {
                self.groups.entry(message.context_id).or_default().clear();
            }
            Command::Leave => {
                self.groups.remove(&message.context_id);
            }
            command if command.is_canvas() => {
                let group = self.groups.entry(message.context_id).or_default();
                if group.len() == MAX_UNDO_GROUP {
                    group.pop_front();
                }
                group.push_back(message.clone());
            }
            _ => {}
        }
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}
