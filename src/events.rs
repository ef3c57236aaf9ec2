/// Result of pressing Next/Finish on a photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Layout or transform not established yet; nothing was exported.
    NotReady,
    /// Preview written, print queued; the editor moves on to `next`.
    Advanced { next: usize },
    /// Last photo done and every print artifact exists.
    ReadyForCheckout,
}
