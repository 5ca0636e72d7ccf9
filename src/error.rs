use std::io;

/// Errors that can arise while building or driving a [`crate::reactor::Reactor`].
///
/// The reactor's steady-state operations (`set`, `del`, `send_buffer`) keep
/// the plain `bool` surface the component design calls for; this type covers
/// the one place construction itself can fail.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("failed to initialize I/O shard {index}: {source}")]
    ShardInit { index: usize, source: io::Error },
}

/// Symbolic timer error codes, corresponding to `TIMER_ERROR_*` in the
/// entry this scheduler is modeled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("timer entry not found")]
    NotFound,
    #[error("timer entry cannot be canceled (already processing or finished)")]
    CannotCancel,
    #[error("timer entry already canceled")]
    AlreadyCanceled,
}
