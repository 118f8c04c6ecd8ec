use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;

use super::Framework;
use crate::config::Event;
use crate::error::{Error, Result};

/// How many events one refill pulls out of the index.
const REFILL: usize = 64;

impl Framework {
    /// Creates an asynchronous event stream for a task.
    ///
    /// The stream drains the task's pending index and waits for the
    /// dispatcher to publish more, ending once the task is
    /// deregistered.
    ///
    /// A task can have at most one live stream; attempting to attach a
    /// second one returns [`Error::AlreadyExists`] until the first is
    /// dropped.
    pub fn events(self: &Arc<Self>, id: u8) -> Result<EventStream> {
        let task = self.find(id)?;
        if task.streaming.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyExists);
        }
        Ok(EventStream {
            fw: Arc::clone(self),
            id,
            pending: VecDeque::new(),
        })
    }
}

/// Asynchronous iterator over a task's page events.
///
/// Created by [`Framework::events`].
pub struct EventStream {
    fw: Arc<Framework>,
    id: u8,
    pending: VecDeque<Event>,
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        let this = self.get_mut();

        if let Some(e) = this.pending.pop_front() {
            return Poll::Ready(Some(e));
        }

        // A deregistered task ends the stream.
        let Ok(task) = this.fw.find(this.id) else {
            return Poll::Ready(None);
        };

        // Park the waker before looking at the index, so an event that
        // lands in between still wakes us.
        *task.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(cx.waker().clone());

        let mut index = task.index.lock().unwrap_or_else(PoisonError::into_inner);
        while this.pending.len() < REFILL {
            match index.pop_first() {
                Some(e) => this.pending.push_back(e),
                None => break,
            }
        }
        drop(index);

        match this.pending.pop_front() {
            Some(e) => Poll::Ready(Some(e)),
            None => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Ok(task) = self.fw.find(self.id) {
            *task.waker.lock().unwrap_or_else(PoisonError::into_inner) = None;
            task.streaming.store(false, Ordering::Release);
        }
    }
}
