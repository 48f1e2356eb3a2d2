// Public API
pub mod channel;
pub use channel::Channel;

// The commit protocol and the one-shot latch back the alternative layer.
pub(crate) mod latch;
pub(crate) mod pick;

#[cfg(test)]
mod tests;
