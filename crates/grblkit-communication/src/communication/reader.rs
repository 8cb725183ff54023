//! Line reader thread
//!
//! Repeatedly blocks in [`Endpoint::read_line`] and forwards every
//! complete inbound line to the dispatcher. No parsing happens here.
//! The thread ends when it observes the shutdown sentinel or the
//! transport reports EOF.

use crate::communication::{Endpoint, Message, SENTINEL_LINE};
use crossbeam_channel::Sender;
use grblkit_core::Result;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) struct LineReader {
    handle: Option<JoinHandle<()>>,
}

impl LineReader {
    pub(crate) fn spawn(
        name: &str,
        endpoint: Arc<dyn Endpoint>,
        tx: Sender<Message>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("{}-reader", name))
            .spawn(move || loop {
                match endpoint.read_line() {
                    Ok(line) if line == SENTINEL_LINE => {
                        tracing::debug!("Reader observed shutdown sentinel");
                        break;
                    }
                    Ok(line) => {
                        if tx.send(Message::Line(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Serial read ended: {}", err);
                        let _ = tx.send(Message::ConnectionLost);
                        break;
                    }
                }
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
