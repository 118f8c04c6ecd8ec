use std::io::{self, BufRead, Error, ErrorKind, Result, Write};

use super::{Op, Reply, Request};
use crate::config::{Event, Interest, TaskInfo};
use crate::itree::EventSource;

/// Consumer end of a control-plane connection.
///
/// Wraps any reader/writer pair speaking the newline-delimited JSON
/// protocol of [`Server::serve`][super::Server::serve]. Framework
/// failures come back as [`io::Error`]s whose kind mirrors the wire
/// code.
pub struct Client<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Client<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Client { input, output }
    }

    /// Bootstraps the framework.
    pub fn start(&mut self, max_tasks: usize) -> Result<()> {
        self.call(&Request::Start { max_tasks })?.unit()
    }

    /// Tears the framework down.
    pub fn stop(&mut self) -> Result<()> {
        self.call(&Request::Stop)?.unit()
    }

    /// Registers a task rooted at `path` and returns its id.
    pub fn register(
        &mut self,
        name: &str,
        interest: &Interest,
        granularity: u32,
        path: &str,
    ) -> Result<u8> {
        let reply = self.call(&Request::Register {
            name: name.to_owned(),
            mask: interest.as_mask(),
            granularity,
            path: path.to_owned(),
        })?;
        match reply {
            Reply::Registered { id } => Ok(id),
            other => other.unexpected(),
        }
    }

    pub fn deregister(&mut self, id: u8) -> Result<()> {
        self.call(&Request::Deregister { id })?.unit()
    }

    /// Drains up to `max` pending events.
    pub fn fetch(&mut self, id: u8, max: u16) -> Result<Vec<Event>> {
        let reply = self.call(&Request::Fetch { id, max })?;
        match reply {
            Reply::Events { events } => Ok(events),
            other => other.unexpected(),
        }
    }

    pub fn mark(&mut self, id: u8, idx: u64, count: u64) -> Result<()> {
        self.cmd(id, Op::Mark { idx, count })?.unit()
    }

    pub fn unmark(&mut self, id: u8, idx: u64, count: u64) -> Result<()> {
        self.cmd(id, Op::Unmark { idx, count })?.unit()
    }

    pub fn check(&mut self, id: u8, idx: u64, count: u64) -> Result<bool> {
        let reply = self.cmd(id, Op::Check { idx, count })?;
        match reply {
            Reply::Done { all_done } => Ok(all_done),
            other => other.unexpected(),
        }
    }

    pub fn get_path(&mut self, id: u8, ino: u64) -> Result<Option<String>> {
        let reply = self.cmd(id, Op::GetPath { ino })?;
        match reply {
            Reply::Path { path } => Ok(path),
            other => other.unexpected(),
        }
    }

    /// Renders the task's progress bitmap server-side.
    pub fn print_bittree(&mut self, id: u8) -> Result<String> {
        let reply = self.cmd(id, Op::PrintBit)?;
        match reply {
            Reply::Text { text } => Ok(text),
            other => other.unexpected(),
        }
    }

    /// Renders the task's pending-event index server-side.
    pub fn print_index(&mut self, id: u8) -> Result<String> {
        let reply = self.cmd(id, Op::PrintItem)?;
        match reply {
            Reply::Text { text } => Ok(text),
            other => other.unexpected(),
        }
    }

    /// Describes every registered task.
    pub fn list(&mut self) -> Result<Vec<TaskInfo>> {
        let reply = self.call(&Request::List)?;
        match reply {
            Reply::Tasks { tasks } => Ok(tasks),
            other => other.unexpected(),
        }
    }

    fn cmd(&mut self, id: u8, op: Op) -> Result<Reply> {
        self.call(&Request::Cmd { id, op })
    }

    /// Sends one request frame and reads one reply frame.
    fn call(&mut self, req: &Request) -> Result<Reply> {
        serde_json::to_writer(&mut self.output, req)?;
        self.output.write_all(b"\n")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed mid-call",
            ));
        }
        Ok(serde_json::from_str(&line)?)
    }
}

impl Reply {
    fn unit(self) -> Result<()> {
        match self {
            Reply::Ok => Ok(()),
            other => other.unexpected(),
        }
    }

    /// Turns an error reply (or a mismatched one) into an `io::Error`.
    fn unexpected<T>(self) -> Result<T> {
        match self {
            Reply::Error { code, message } => Err(Error::new(code.as_io_kind(), message)),
            other => Err(Error::new(
                ErrorKind::InvalidData,
                format!("unexpected reply: {other:?}"),
            )),
        }
    }
}

impl<R: BufRead, W: Write> EventSource for Client<R, W> {
    fn fetch_events(&mut self, id: u8, max: usize) -> io::Result<Vec<Event>> {
        let max = u16::try_from(max).unwrap_or(u16::MAX);
        self.fetch(id, max)
    }

    fn check_done(&mut self, id: u8, idx: u64, count: u64) -> io::Result<bool> {
        self.check(id, idx, count)
    }

    fn lookup_path(&mut self, id: u8, ino: u64) -> io::Result<Option<String>> {
        self.get_path(id, ino)
    }
}
