//! Control plane: a command multiplexer over any bidirectional handle.
//!
//! The framework core is driven in-process; this module gives external
//! consumers the same surface over a byte stream (a Unix socket, a pipe,
//! anything `Read + Write`). Commands and replies travel as
//! newline-delimited JSON frames: one [`Request`] in, one [`Reply`] out.
//!
//! [`Server`] owns the framework plus a mount table that turns the
//! registration path into a scope volume and parent directory;
//! [`Client`] wraps the consumer end with typed methods.

#[cfg(test)]
mod test;

mod client;

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

pub use client::Client;

use crate::cache::{FileKind, Volume};
use crate::config::{Event, Interest, RegisterOpts, TaskInfo};
use crate::error::{Error, Result};
use crate::registry::Framework;

/// One control-plane command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    /// Bootstrap the framework.
    Start { max_tasks: usize },
    /// Tear the framework down.
    Stop,
    /// Register a task; `path` selects the scope volume and the parent
    /// directory rooting the resolver.
    Register {
        name: String,
        mask: u8,
        granularity: u32,
        path: String,
    },
    Deregister { id: u8 },
    /// Drain up to `max` pending events.
    Fetch { id: u8, max: u16 },
    /// Per-task subcommands.
    Cmd { id: u8, op: Op },
    /// Describe every registered task.
    List,
}

/// Subcommands of [`Request::Cmd`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Mark { idx: u64, count: u64 },
    Unmark { idx: u64, count: u64 },
    Check { idx: u64, count: u64 },
    GetPath { ino: u64 },
    PrintBit,
    PrintItem,
}

/// One control-plane response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Registered { id: u8 },
    Events { events: Vec<Event> },
    Done { all_done: bool },
    Path { path: Option<String> },
    Text { text: String },
    Tasks { tasks: Vec<TaskInfo> },
    Error { code: ErrorCode, message: String },
}

/// Stable failure codes carried over the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    NotInitialized,
    Exhausted,
}

impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotFound => ErrorCode::NotFound,
            Error::AlreadyExists => ErrorCode::AlreadyExists,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::NotInitialized => ErrorCode::NotInitialized,
            Error::Exhausted => ErrorCode::Exhausted,
        }
    }
}

impl ErrorCode {
    pub(crate) fn as_io_kind(self) -> io::ErrorKind {
        match self {
            ErrorCode::NotFound => io::ErrorKind::NotFound,
            ErrorCode::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorCode::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorCode::NotInitialized => io::ErrorKind::NotConnected,
            ErrorCode::Exhausted => io::ErrorKind::OutOfMemory,
        }
    }
}

/// Serves control-plane connections against one framework instance.
pub struct Server {
    fw: Arc<Framework>,
    /// Mount point to volume, longest prefix wins.
    mounts: BTreeMap<String, Arc<Volume>>,
}

impl Server {
    pub fn new(fw: Arc<Framework>) -> Self {
        Server {
            fw,
            mounts: BTreeMap::new(),
        }
    }

    /// Makes a volume reachable for registration under `at`.
    pub fn mount(&mut self, at: &str, volume: Arc<Volume>) {
        let at = at.trim_end_matches('/');
        self.mounts.insert(at.to_owned(), volume);
    }

    /// Reads requests off `input` and writes one reply per request to
    /// `output` until end of stream.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let reply = match serde_json::from_str::<Request>(&line) {
                Ok(req) => self.handle(req),
                Err(e) => {
                    warn!("unparsable control frame: {e}");
                    Reply::Error {
                        code: ErrorCode::InvalidArgument,
                        message: e.to_string(),
                    }
                }
            };

            serde_json::to_writer(&mut output, &reply)?;
            output.write_all(b"\n")?;
            output.flush()?;
        }
        Ok(())
    }

    /// Executes one command.
    pub fn handle(&self, req: Request) -> Reply {
        // While the framework is down (or tearing down), only the
        // on/off switches are accepted.
        if !self.fw.online() && !matches!(req, Request::Start { .. } | Request::Stop) {
            return Reply::Error {
                code: ErrorCode::NotInitialized,
                message: Error::NotInitialized.to_string(),
            };
        }

        match req {
            Request::Start { max_tasks } => reply_unit(self.fw.bootstrap(max_tasks)),
            Request::Stop => reply_unit(self.fw.shutdown()),
            Request::Register {
                name,
                mask,
                granularity,
                path,
            } => match self.register(name, mask, granularity, &path) {
                Ok(id) => Reply::Registered { id },
                Err(e) => reply_err(e),
            },
            Request::Deregister { id } => reply_unit(self.fw.deregister(id)),
            Request::Fetch { id, max } => match self.fw.fetch(id, usize::from(max)) {
                Ok(events) => Reply::Events { events },
                Err(e) => reply_err(e),
            },
            Request::Cmd { id, op } => self.command(id, op),
            Request::List => Reply::Tasks {
                tasks: self.fw.tasks(),
            },
        }
    }

    fn command(&self, id: u8, op: Op) -> Reply {
        match op {
            Op::Mark { idx, count } => reply_unit(self.fw.mark(id, idx, count)),
            Op::Unmark { idx, count } => reply_unit(self.fw.unmark(id, idx, count)),
            Op::Check { idx, count } => match self.fw.check(id, idx, count) {
                Ok(all_done) => Reply::Done { all_done },
                Err(e) => reply_err(e),
            },
            Op::GetPath { ino } => match self.fw.get_path(id, ino) {
                Ok(path) => Reply::Path { path },
                Err(e) => reply_err(e),
            },
            Op::PrintBit => match self.fw.dump_bittree(id) {
                Ok(text) => Reply::Text { text },
                Err(e) => reply_err(e),
            },
            Op::PrintItem => match self.fw.dump_index(id) {
                Ok(text) => Reply::Text { text },
                Err(e) => reply_err(e),
            },
        }
    }

    fn register(&self, name: String, mask: u8, granularity: u32, path: &str) -> Result<u8> {
        let (volume, parent) = self.resolve(path)?;
        if volume.kind(parent)? != FileKind::Directory {
            return Err(Error::InvalidArgument("registration path is not a directory"));
        }

        self.fw.register(RegisterOpts {
            name,
            interest: Interest::from_mask(mask)?,
            granularity,
            volume,
            parent: Some(parent),
        })
    }

    /// Resolves a registration path to its volume and the inode of the
    /// named directory.
    fn resolve(&self, path: &str) -> Result<(Arc<Volume>, u64)> {
        let path = path.trim_end_matches('/');

        let (at, volume) = self
            .mounts
            .iter()
            .filter(|(at, _)| {
                path == at.as_str() || path.starts_with(&format!("{at}/")) || at.is_empty()
            })
            .max_by_key(|(at, _)| at.len())
            .ok_or(Error::NotFound)?;

        let rest = path.strip_prefix(at.as_str()).unwrap_or(path);
        let ino = volume.lookup(rest)?;
        Ok((Arc::clone(volume), ino))
    }
}

fn reply_unit(res: Result<()>) -> Reply {
    match res {
        Ok(()) => Reply::Ok,
        Err(e) => reply_err(e),
    }
}

fn reply_err(e: Error) -> Reply {
    Reply::Error {
        code: ErrorCode::from(&e),
        message: e.to_string(),
    }
}
