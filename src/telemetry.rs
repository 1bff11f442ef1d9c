//! Telemetry utilities: timing guards and standard spans.

use std::time::Instant;

/// Guard for timing a burst merge.
///
/// Records merge latency when dropped.
pub struct MergeTimer {
    start: Instant,
}

impl MergeTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Drop for MergeTimer {
    fn drop(&mut self) {
        crate::metrics::record_burst_merged(self.start.elapsed().as_secs_f64());
    }
}

/// Standardized span constructors for mesh observability.
pub mod spans {
    use std::net::SocketAddr;
    use tracing::{Span, info_span};

    /// Span for one link session. The peer name is filled in after the handshake.
    pub fn link(addr: SocketAddr, outbound: bool) -> Span {
        info_span!(
            "link",
            peer = %addr,
            outbound,
            name = tracing::field::Empty
        )
    }

    /// Span for the coordinator task.
    pub fn coordinator(server: &str) -> Span {
        info_span!("coordinator", server = %server)
    }
}
