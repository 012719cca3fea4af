//! Background thread that runs queued impulse reloads.
//!
//! Requests coalesce: the queue holds a single slot, so any number of
//! `Async` triggers arriving while a reload is pending collapse into one.

use std::sync::Weak;
use std::thread::JoinHandle;

use crossbeam_channel::{Sender, TrySendError, bounded};

use crate::effect::EffectShared;
use crate::error::ConvolutionError;

pub(crate) struct Reloader {
    sender: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reloader {
    pub(crate) fn spawn(shared: Weak<EffectShared>) -> Result<Self, ConvolutionError> {
        let (sender, receiver) = bounded::<()>(1);
        let name = "partita-reload".to_string();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while receiver.recv().is_ok() {
                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    let outcome = shared.reload();
                    shared.notify(&outcome);
                }
                tracing::debug!("reload worker stopped");
            })
            .map_err(|e| ConvolutionError::worker_spawn(name, e))?;

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    /// Queue a reload. Returns `false` only when the worker has stopped.
    pub(crate) fn request(&self) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

impl Drop for Reloader {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            // The last owner may be the worker itself, mid-reload.
            if thread.thread().id() == std::thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                tracing::error!("reload worker panicked");
            }
        }
    }
}
