//! Reply and event lines as they come off the wire, before a [`crate::Command`]-specific
//! interpretation is applied to them.

/// One parsed `DDD(SP|-|+) MESSAGE` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub code: u16,
    pub message: String,
    pub kind: ReplyLineKind,
    /// The dot-unstuffed body of a `+` data block opened by this line, if any.
    pub data: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLineKind {
    /// `DDD MESSAGE` — this line ends the batch.
    End,
    /// `DDD-MESSAGE` or `DDD+MESSAGE` — more lines follow in this batch.
    Continue,
}

/// The decoder's output for a single physical (or logical, for `+` blocks) line: either
/// part of a synchronous reply, or an asynchronous event (6xx).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlLine {
    Reply(ReplyLine),
    Event {
        keyword: String,
        message: String,
        data: Option<Vec<String>>,
    },
}

/// The full set of [`ReplyLine`]s that make up one command's response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplyBatch {
    pub lines: Vec<ReplyLine>,
}

impl ReplyBatch {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn push(&mut self, line: ReplyLine) {
        self.lines.push(line);
    }

    /// Classify the batch per the 2xx/4xx/5xx split.
    ///
    /// Panics if called on an empty batch; callers are expected to treat an empty
    /// batch (stream ended before any line arrived) as a distinct, earlier case.
    pub fn into_reply(self) -> Reply {
        let last = self.lines.last().expect("reply batch must not be empty");

        if last.code / 100 != 2 {
            return Reply::Error {
                code: last.code,
                message: last.message.clone(),
            };
        }

        if self.lines.len() == 1 && last.message == "OK" && last.data.is_none() {
            return Reply::Ok;
        }

        Reply::Success {
            code: last.code,
            lines: self.lines,
        }
    }
}

/// A reply batch classified by status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The common `250 OK` case with nothing else in the batch.
    Ok,
    /// Any other successful (2xx) batch, carrying every line for the caller to parse.
    Success { code: u16, lines: Vec<ReplyLine> },
    /// A 4xx/5xx batch; only the final line's code and message are kept, per tor's own
    /// convention that earlier continuation lines in an error batch are informational.
    Error { code: u16, message: String },
}

impl Reply {
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }
}
