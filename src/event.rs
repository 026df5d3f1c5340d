//! Events reported to the caller while a job runs

use std::{sync::mpsc::Sender, time::Duration};

use crate::error::FailureReason;

/// Something the caller should know about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Bytes of the current image sent to the device
    Progress {
        address: u32,
        bytes_written: u64,
        total_bytes: u64,
    },
    /// A human readable log line
    Log(String),
    /// The outcome of a flash job, always the last event of the job
    JobResult(JobReport),
    /// A full chip erase has completed
    EraseComplete,
}

/// Outcome of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failure(FailureReason),
}

/// Final report of a job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub result: JobResult,
    pub message: String,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.result == JobResult::Success
    }
}

/// Receives events from the engine
///
/// Implementations must not block, the worker waits on nothing but the
/// device.
pub trait EventSink {
    fn emit(&mut self, event: Event);

    /// Emit a log line
    fn log(&mut self, line: String) {
        self.emit(Event::Log(line));
    }
}

impl EventSink for Sender<Event> {
    fn emit(&mut self, event: Event) {
        // A dropped receiver means nobody is listening anymore
        let _ = self.send(event);
    }
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}
