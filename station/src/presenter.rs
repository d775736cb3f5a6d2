// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The operator-facing surface scripts talk to.
//!
//! Scripts only ever see this trait: a log line sink, a cancellation
//! flag, and a completion signal. The console implementation below is the
//! whole "UI" of the command-line station; a windowed front end would
//! implement the same trait.

use drv_fixture_hid::CancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Information,
    Pass,
    Fail,
}

pub trait Presenter: Send + Sync {
    fn log(&self, message: &str, severity: Severity);
    fn is_cancelling(&self) -> bool;
    fn script_completed(&self);
}

pub struct ConsolePresenter {
    cancel: CancelToken,
}

impl ConsolePresenter {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl Presenter for ConsolePresenter {
    fn log(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Information => println!("{message}"),
            Severity::Pass => println!("[pass] {message}"),
            Severity::Fail => eprintln!("[fail] {message}"),
        }
    }

    fn is_cancelling(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn script_completed(&self) {}
}
