//! Kernel lifecycle states and the forward-only startup sequence.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelState {
    /// Not running.
    Offline,
    /// Worker up, transport starting.
    Initial,
    /// Discovery broadcast or handshake in progress.
    DiscoverNodes,
    /// Reading descriptor data from discovered nodes.
    ReadNodeDescriptors,
    /// Pushing local parameters to the device.
    ConfigureDevice,
    /// Fetching bulk data (locomotive list).
    DownloadCatalog,
    /// Online.
    Started,
    /// Link or liveness failure; needs a stop/start cycle.
    Error,
}

impl KernelState {
    /// Name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            KernelState::Offline => "offline",
            KernelState::Initial => "initial",
            KernelState::DiscoverNodes => "discover-nodes",
            KernelState::ReadNodeDescriptors => "read-node-descriptors",
            KernelState::ConfigureDevice => "configure-device",
            KernelState::DownloadCatalog => "download-catalog",
            KernelState::Started => "started",
            KernelState::Error => "error",
        }
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered startup steps of one protocol.
///
/// Moves only forward. `Error` can be entered from anywhere and is final
/// until the kernel is restarted.
///
/// ```rust
/// use rs_trackside::kernel::{KernelState, StartupSequence};
///
/// let mut seq = StartupSequence::new(&[
///     KernelState::Initial,
///     KernelState::DiscoverNodes,
///     KernelState::Started,
/// ]);
/// seq.begin();
/// assert_eq!(seq.current(), KernelState::Initial);
/// assert_eq!(seq.advance(), Some(KernelState::DiscoverNodes));
/// assert_eq!(seq.advance(), Some(KernelState::Started));
/// assert_eq!(seq.advance(), None);
/// ```
#[derive(Clone, Debug)]
pub struct StartupSequence {
    steps: &'static [KernelState],
    index: usize,
    current: KernelState,
}

impl StartupSequence {
    /// Creates an offline sequence over `steps`.
    pub const fn new(steps: &'static [KernelState]) -> Self {
        Self {
            steps,
            index: 0,
            current: KernelState::Offline,
        }
    }

    /// Enter the first step.
    pub fn begin(&mut self) -> KernelState {
        self.index = 0;
        self.current = self
            .steps
            .first()
            .copied()
            .unwrap_or(KernelState::Started);
        self.current
    }

    /// Current state.
    pub const fn current(&self) -> KernelState {
        self.current
    }

    /// The configured steps.
    pub const fn steps(&self) -> &'static [KernelState] {
        self.steps
    }

    /// True once the last step is reached.
    pub fn is_started(&self) -> bool {
        self.current == KernelState::Started
    }

    /// True after [`fail`](Self::fail).
    pub fn is_failed(&self) -> bool {
        self.current == KernelState::Error
    }

    /// Enter the next step. `None` at the end, when failed or offline.
    pub fn advance(&mut self) -> Option<KernelState> {
        if matches!(self.current, KernelState::Error | KernelState::Offline) {
            return None;
        }
        let next = self.steps.get(self.index + 1).copied()?;
        self.index += 1;
        self.current = next;
        Some(next)
    }

    /// Enter [`KernelState::Error`].
    pub fn fail(&mut self) {
        self.current = KernelState::Error;
    }

    /// Back to offline.
    pub fn reset(&mut self) {
        self.index = 0;
        self.current = KernelState::Offline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEPS: &[KernelState] = &[
        KernelState::Initial,
        KernelState::DiscoverNodes,
        KernelState::ConfigureDevice,
        KernelState::Started,
    ];

    #[test]
    fn starts_offline() {
        let seq = StartupSequence::new(STEPS);
        assert_eq!(seq.current(), KernelState::Offline);
    }

    #[test]
    fn advance_stays_in_order() {
        let mut seq = StartupSequence::new(STEPS);
        seq.begin();
        let mut visited = vec![seq.current()];
        while let Some(s) = seq.advance() {
            visited.push(s);
        }
        assert_eq!(visited, STEPS);
        assert!(seq.is_started());
    }

    #[test]
    fn no_advance_after_failure() {
        let mut seq = StartupSequence::new(STEPS);
        seq.begin();
        seq.fail();
        assert!(seq.is_failed());
        assert_eq!(seq.advance(), None);
        assert_eq!(seq.current(), KernelState::Error);
    }

    #[test]
    fn offline_does_not_advance() {
        let mut seq = StartupSequence::new(STEPS);
        assert_eq!(seq.advance(), None);
        seq.begin();
        seq.reset();
        assert_eq!(seq.advance(), None);
    }
}
