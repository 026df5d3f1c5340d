//! Background worker running flash jobs off the caller's thread
//!
//! Jobs are queued and run one at a time. Everything the worker has to say is
//! delivered through the [Event] receiver returned by [FlashWorker::spawn];
//! the only thing the caller can do to a running job is cancel it.

use std::{
    sync::mpsc::{channel, Receiver, Sender},
    thread::{self, JoinHandle},
};

use log::debug;

use crate::{
    error::Error,
    event::Event,
    flasher::{FlashJob, Flasher},
    session::SessionConnector,
    transfer::CancelFlag,
};

enum Request {
    Flash(Box<FlashJob>),
    Erase { port: String, baud: u32 },
}

/// Handle to the background worker thread
pub struct FlashWorker {
    requests: Option<Sender<Request>>,
    cancel: CancelFlag,
    handle: Option<JoinHandle<()>>,
}

impl FlashWorker {
    /// Start a worker opening its sessions through `connector`
    pub fn spawn<C>(connector: C) -> Result<(Self, Receiver<Event>), Error>
    where
        C: SessionConnector + 'static,
    {
        let (requests, request_rx) = channel::<Request>();
        let (mut events, event_rx) = channel::<Event>();
        let cancel = CancelFlag::new();

        let mut flasher = Flasher::new(Box::new(connector), cancel.clone());

        let handle = thread::Builder::new()
            .name("espburn-worker".into())
            .spawn(move || {
                for request in request_rx {
                    match request {
                        Request::Flash(job) => {
                            debug!("Starting flash job on {}", job.port);
                            flasher.flash(&job, &mut events);
                        }
                        Request::Erase { port, baud } => {
                            debug!("Starting erase on {port}");
                            flasher.erase(&port, baud, &mut events);
                        }
                    }
                }
                debug!("Worker shutting down");
            })
            .map_err(Error::WorkerUnavailable)?;

        Ok((
            FlashWorker {
                requests: Some(requests),
                cancel,
                handle: Some(handle),
            },
            event_rx,
        ))
    }

    /// Queue a flash job
    pub fn submit(&self, job: FlashJob) -> Result<(), Error> {
        self.send(Request::Flash(Box::new(job)))
    }

    /// Queue a full chip erase of the device on `port`
    pub fn erase(&self, port: impl Into<String>, baud: u32) -> Result<(), Error> {
        self.send(Request::Erase {
            port: port.into(),
            baud,
        })
    }

    /// Cancel the running job at its next block boundary
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Wait for all queued jobs to finish and stop the worker
    pub fn shutdown(mut self) {
        self.join();
    }

    fn send(&self, request: Request) -> Result<(), Error> {
        self.requests
            .as_ref()
            .ok_or(Error::WorkerStopped)?
            .send(request)
            .map_err(|_| Error::WorkerStopped)
    }

    fn join(&mut self) {
        drop(self.requests.take());

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Flash worker thread panicked");
            }
        }
    }
}

impl Drop for FlashWorker {
    fn drop(&mut self) {
        self.join();
    }
}
