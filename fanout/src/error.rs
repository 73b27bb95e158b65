use std::io;

/// Error returned when a slot cannot be connected.
///
/// Connecting only fails when the operating system refuses to create a thread that the delivery
/// scheme needs.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The dedicated worker thread of an ordered slot could not be spawned.
    ///
    /// The identifier assigned to the failed slot is consumed and never handed out again.
    #[error("failed to spawn the strand worker thread")]
    SpawnStrand(#[source] io::Error),

    /// The shared worker pool of a pooled slot could not be started.
    ///
    /// This happens before an identifier is assigned, so none is consumed.
    #[error("failed to start the shared worker pool")]
    StartPool(#[source] io::Error),
}
