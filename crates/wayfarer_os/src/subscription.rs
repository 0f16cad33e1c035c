#![forbid(unsafe_code)]

use std::fmt;

type Detach = Box<dyn FnOnce() + Send + 'static>;

/// Handle for a registered handler. Dropping it detaches the handler.
#[must_use = "dropping a Subscription detaches its handler immediately"]
pub struct Subscription {
    detach: Option<Detach>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription with nothing to detach.
    pub fn detached() -> Self {
        Self { detach: None }
    }

    pub fn is_active(&self) -> bool {
        self.detach.is_some()
    }

    /// Safe to call any number of times; only the first call detaches.
    pub fn unsubscribe(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
