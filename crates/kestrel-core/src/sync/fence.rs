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

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A driver fence as exposed by a [`GpuBackend`](crate::gpu::GpuBackend).
///
/// Dropping the box destroys the driver object, unless the implementation
/// hands it back to a recycler instead.
pub trait NativeFence: Send + Sync + Debug {
    /// Non-blocking query of the fence status.
    fn poll(&self) -> bool;

    /// Blocks until the fence signals or `timeout` elapses.
    /// ## Returns
    /// `true` if the fence signaled in time.
    fn wait(&self, timeout: Duration) -> bool;

    /// Returns the fence to the unsignaled state so it can guard a new submission.
    fn reset(&mut self);
}

#[derive(Debug)]
struct FenceInner {
    native: Box<dyn NativeFence>,
    signaled: AtomicBool,
}

/// A shared token that tells when the GPU finished a piece of work.
///
/// Every object waiting on the same submission holds a clone. Once the fence has
/// been seen signaled the result is cached and the driver is never asked again.
/// When the last clone drops, the native fence drops with it.
#[derive(Debug, Clone)]
pub struct FenceHandle {
    inner: Arc<FenceInner>,
}

impl FenceHandle {
    /// Wraps a freshly created (or freshly reset) native fence.
    pub fn new(native: Box<dyn NativeFence>) -> Self {
        Self {
            inner: Arc::new(FenceInner {
                native,
                signaled: AtomicBool::new(false),
            }),
        }
    }

    /// Non-blocking check for completion.
    pub fn is_signaled(&self) -> bool {
        if self.inner.signaled.load(Ordering::Acquire) {
            return true;
        }
        if self.inner.native.poll() {
            self.inner.signaled.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Waits for completion for at most `timeout`.
    ///
    /// Returns `false` if the fence did not signal in time.
    pub fn wait_up_to(&self, timeout: Duration) -> bool {
        if self.is_signaled() {
            return true;
        }
        if self.inner.native.wait(timeout) {
            self.inner.signaled.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Returns `true` if both handles refer to the same submission.
    pub fn ptr_eq(&self, other: &FenceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live clones of this handle.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingFence {
        ready: Arc<AtomicBool>,
        polls: Arc<AtomicUsize>,
    }

    impl NativeFence for CountingFence {
        fn poll(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.ready.load(Ordering::SeqCst)
        }

        fn wait(&self, _timeout: Duration) -> bool {
            self.poll()
        }

        fn reset(&mut self) {
            self.ready.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn signaled_state_is_cached() {
        let fence = CountingFence::default();
        let ready = fence.ready.clone();
        let polls = fence.polls.clone();
        let handle = FenceHandle::new(Box::new(fence));

        assert!(!handle.is_signaled());
        ready.store(true, Ordering::SeqCst);
        assert!(handle.is_signaled());
        let after_first_hit = polls.load(Ordering::SeqCst);

        // The driver reverting the state must not be observed any more.
        ready.store(false, Ordering::SeqCst);
        assert!(handle.is_signaled());
        assert!(handle.wait_up_to(Duration::ZERO));
        assert_eq!(polls.load(Ordering::SeqCst), after_first_hit);
    }

    #[test]
    fn wait_up_to_reports_timeout() {
        let handle = FenceHandle::new(Box::new(CountingFence::default()));
        assert!(!handle.wait_up_to(Duration::from_millis(1)));
    }

    #[test]
    fn clones_share_the_submission() {
        let a = FenceHandle::new(Box::new(CountingFence::default()));
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.holders(), 2);
        drop(b);
        assert_eq!(a.holders(), 1);
    }
}
