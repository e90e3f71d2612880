//! The fixed constants of `spec.md §6`, plus a couple of sane defaults
//! for the ambient knobs `spec.md` leaves to configuration.

use std::time::Duration;

/// Number of channel slots held open per peer (`spec.md §3`, `ChannelPool`).
pub const CHANNEL_POOL_SIZE: usize = 8;

/// Period of the timeout sweeper (`spec.md §4.3`).
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// `serde(default = ...)` providers for [`crate::config::MessagingConfig`].
pub fn pool_size() -> usize {
    CHANNEL_POOL_SIZE
}

pub fn sweep_interval() -> Duration {
    SWEEP_INTERVAL
}

/// Floor below which the adaptive path never fires, even if `phi`
/// would otherwise declare a timeout (`spec.md §4.3`).
pub const MIN_ADAPTIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Hard cap on how long a zero-timeout (adaptive) request is allowed to
/// wait before it is failed regardless of the monitor (`spec.md §4.3`).
pub const MAX_ADAPTIVE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Capacity of a `RequestMonitor`'s rolling sample window (`spec.md §3`).
pub const SAMPLE_WINDOW: usize = 10;

/// Number of replies that must be observed before a window is allowed
/// to roll over (`spec.md §4.3`, `addReplyTime`).
pub const WINDOW_UPDATE_SAMPLE_THRESHOLD: u32 = 100;

/// Minimum age of the current window before it is allowed to roll over.
pub const WINDOW_UPDATE_PERIOD: Duration = Duration::from_secs(60);

/// Minimum sample count `phi` requires before it will report anything
/// other than `0`. Preserved source quirk: unreachable given
/// [`SAMPLE_WINDOW`] of 10 (`spec.md §9`).
pub const MIN_SAMPLES_FOR_PHI: u32 = 25;

/// `1 / ln(10)`, the scaling factor in the phi-accrual formula.
pub fn phi_factor() -> f64 {
    1.0 / 10f64.ln()
}

/// Suspicion threshold above which `phi` declares a timeout.
pub const PHI_THRESHOLD: f64 = 12.0;

/// How long a `RequestMonitor` entry may go unused before it expires
/// from the per-connection cache (`spec.md §3`).
pub const MONITOR_EXPIRY: Duration = Duration::from_secs(60);

/// Timeout on the initial TCP connect (`spec.md §4.5`, bootstrap options).
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

// `spec.md §4.5` also lists write-buffer high/low watermarks (640 KiB /
// 320 KiB on outbound client sockets, 32 KiB / 8 KiB on server child
// sockets). These name a Netty `WriteBufferWaterMark`, which bounds
// queued-but-unflushed user-space write bytes; tokio's socket types
// have no equivalent to set it against, since `Channel::send` writes
// straight to the socket with no such queue to bound. See `DESIGN.md`
// open question 8.

/// Socket receive/send buffer sizes shared by client and server sockets.
pub const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// Backlog used when binding the server's listening socket.
pub const SERVER_BACKLOG: u32 = 128;
