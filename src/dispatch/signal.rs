/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2025 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    future::Future,
    pin::Pin,
    sync::{Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

/// Per-account wake-up signal used to park a task until the dispatcher
/// hands it an item or the account goes away.
///
/// A `notify()` that happens before `wait()` is polled is not lost: the
/// signal stays raised until `reset()`.
pub struct GrantSignal {
    state: Mutex<SignalState>,
}

struct SignalState {
    raised: bool,
    waker: Option<Waker>,
}

impl GrantSignal {
    pub fn new() -> Self {
        Self { state: Mutex::new(SignalState { raised: false, waker: None }) }
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the signal and wake the parked task, if any.
    pub fn notify(&self) {
        let mut state = self.lock();
        state.raised = true;
        if let Some(waker) = state.waker.take() {
            waker.wake()
        }
    }

    /// Lower the signal before checking the dispatcher again.
    pub fn reset(&self) {
        self.lock().raised = false;
    }

    /// Wait until the signal is raised.
    pub fn wait(&self) -> GrantWait<'_> {
        GrantWait { signal: self }
    }
}

impl Default for GrantSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GrantWait<'a> {
    signal: &'a GrantSignal,
}

impl Future for GrantWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.signal.lock();

        if state.raised {
            state.waker = None;
            return Poll::Ready(())
        }

        match state.waker {
            Some(ref waker) if waker.will_wake(cx.waker()) => {}
            _ => state.waker = Some(cx.waker().clone()),
        }

        Poll::Pending
    }
}
