//! Test outbound sinks

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use militia_room_server::game::{Outbound, SendError};
use militia_room_server::ws::protocol::ServerMsg;

/// Records every message delivered to one client
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<ServerMsg>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn Outbound> {
        Box::new(self.clone())
    }

    pub fn messages(&self) -> Vec<ServerMsg> {
        self.messages.lock().clone()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&ServerMsg) -> bool) -> usize {
        self.messages.lock().iter().filter(|m| pred(m)).count()
    }
}

impl Outbound for RecordingSink {
    fn send(&self, payload: Arc<str>) -> Result<(), SendError> {
        let msg: ServerMsg = serde_json::from_str(&payload).expect("server sent invalid JSON");
        self.messages.lock().push(msg);
        Ok(())
    }
}

/// A client whose connection is already gone
pub struct ClosedSink;

impl Outbound for ClosedSink {
    fn send(&self, _payload: Arc<str>) -> Result<(), SendError> {
        Err(SendError::Closed)
    }
}
