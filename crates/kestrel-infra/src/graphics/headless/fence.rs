// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use kestrel_core::NativeFence;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct TimelineState {
    /// Serial of the last submission handed to the "GPU".
    issued: u64,
    /// Every submission up to this serial has finished.
    completed: u64,
}

/// An in-order queue of simulated GPU submissions.
///
/// Every fence guards one submission serial. Submissions complete in order, and
/// only when the owner of the timeline says so.
#[derive(Debug, Default)]
pub struct GpuTimeline {
    state: Mutex<TimelineState>,
    progress: Condvar,
}

impl GpuTimeline {
    /// Creates an idle timeline.
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.issued += 1;
        state.issued
    }

    /// Serial of the most recent submission.
    pub fn issued(&self) -> u64 {
        self.state.lock().unwrap().issued
    }

    /// Serial of the most recent completed submission.
    pub fn completed(&self) -> u64 {
        self.state.lock().unwrap().completed
    }

    /// Completes every submission up to and including `serial`.
    pub fn retire_through(&self, serial: u64) {
        let mut state = self.state.lock().unwrap();
        let target = serial.min(state.issued);
        if target > state.completed {
            state.completed = target;
            log::trace!("GpuTimeline: retired through submission {target}");
            self.progress.notify_all();
        }
    }

    /// Completes every submission issued so far.
    pub fn retire_all(&self) {
        let issued = self.issued();
        self.retire_through(issued);
    }

    fn is_complete(&self, serial: u64) -> bool {
        self.state.lock().unwrap().completed >= serial
    }

    fn wait_for(&self, serial: u64, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .progress
            .wait_timeout_while(state, timeout, |s| s.completed < serial)
            .unwrap();
        state.completed >= serial
    }
}

/// A fence that signals once its submission retires on the [`GpuTimeline`].
#[derive(Debug)]
pub struct HeadlessFence {
    timeline: Arc<GpuTimeline>,
    serial: u64,
}

impl HeadlessFence {
    pub(super) fn new(timeline: Arc<GpuTimeline>) -> Self {
        let serial = timeline.issue();
        Self { timeline, serial }
    }

    /// The submission this fence currently guards.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl NativeFence for HeadlessFence {
    fn poll(&self) -> bool {
        self.timeline.is_complete(self.serial)
    }

    fn wait(&self, timeout: Duration) -> bool {
        self.timeline.wait_for(self.serial, timeout)
    }

    fn reset(&mut self) {
        self.serial = self.timeline.issue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fences_complete_in_submission_order() {
        let timeline = Arc::new(GpuTimeline::new());
        let first = HeadlessFence::new(timeline.clone());
        let second = HeadlessFence::new(timeline.clone());
        assert_eq!(second.serial(), first.serial() + 1);

        timeline.retire_through(first.serial());
        assert!(first.poll());
        assert!(!second.poll());

        timeline.retire_all();
        assert!(second.poll());
    }

    #[test]
    fn retiring_past_the_head_is_clamped() {
        let timeline = Arc::new(GpuTimeline::new());
        let _fence = HeadlessFence::new(timeline.clone());
        timeline.retire_through(100);
        assert_eq!(timeline.completed(), 1);

        let later = HeadlessFence::new(timeline.clone());
        assert!(!later.poll());
    }

    #[test]
    fn reset_rearms_the_fence() {
        let timeline = Arc::new(GpuTimeline::new());
        let mut fence = HeadlessFence::new(timeline.clone());
        timeline.retire_all();
        assert!(fence.poll());

        fence.reset();
        assert!(!fence.poll());
        assert!(!fence.wait(Duration::from_millis(1)));
    }

    #[test]
    fn wait_wakes_up_when_another_thread_retires() {
        let timeline = Arc::new(GpuTimeline::new());
        let fence = HeadlessFence::new(timeline.clone());

        let gpu = {
            let timeline = timeline.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                timeline.retire_all();
            })
        };

        assert!(fence.wait(Duration::from_secs(5)));
        gpu.join().unwrap();
    }
}
