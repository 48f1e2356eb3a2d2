/// Runs a closure when dropped, whether the scope exits normally, early, or
/// by panic.
///
/// The closure sits in an `Option` so it runs at most once even if the drop
/// path is reached twice through unwinding.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    closure: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(closure: F) -> ScopeGuard<F> {
        ScopeGuard {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}
