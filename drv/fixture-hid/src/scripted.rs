// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A scripted in-memory [`ReportChannel`].
//!
//! Stands in for the fixture when driving the instrument stack in tests:
//! records every outbound report and serves replies from a queue. Clones
//! share state, so a test can keep a handle while the bus owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::{HidError, ReportChannel, REPORT_LEN};

#[derive(Default)]
struct State {
    written: Vec<(u8, [u8; REPORT_LEN])>,
    replies: VecDeque<[u8; REPORT_LEN]>,
}

#[derive(Clone, Default)]
pub struct ScriptedChannel {
    state: Arc<Mutex<State>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one inbound report.
    pub fn push_reply(&self, report: [u8; REPORT_LEN]) {
        self.state.lock().unwrap().replies.push_back(report);
    }

    /// Everything written so far, in order.
    pub fn written(&self) -> Vec<(u8, [u8; REPORT_LEN])> {
        self.state.lock().unwrap().written.clone()
    }
}

impl ReportChannel for ScriptedChannel {
    fn write_report(
        &mut self,
        report_id: u8,
        payload: &[u8; REPORT_LEN],
    ) -> Result<(), HidError> {
        self.state.lock().unwrap().written.push((report_id, *payload));
        Ok(())
    }

    fn read_report(&mut self) -> Result<[u8; REPORT_LEN], HidError> {
        self.state
            .lock()
            .unwrap()
            .replies
            .pop_front()
            .ok_or(HidError::ShortReport(0))
    }
}
