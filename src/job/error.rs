use std::any::Any;

/// A failure raised inside a job.
///
/// Faults travel down the continuation chain to the nearest
/// [`Job::catch`](crate::Job::catch) frame; an uncaught fault reaches the
/// scheduler's top-level handler. A dropped fault is a bug, so every
/// execution site either forwards or reports.
#[derive(thiserror::Error, Debug)]
pub enum Fault {
    /// A job raised an error value via [`Job::fail`](crate::Job::fail) or a
    /// fallible combinator.
    #[error("job failed: {0}")]
    Error(#[from] anyhow::Error),

    /// A user closure panicked. The payload is stringified at the catch
    /// site; the original unwind never crosses the worker loop.
    #[error("job panicked: {0}")]
    Panic(String),
}

impl Fault {
    pub fn msg(msg: impl Into<String>) -> Fault {
        Fault::Error(anyhow::anyhow!(msg.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Fault {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string());
        Fault::Panic(msg)
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Fault::Panic(_))
    }
}
