//! `ji-kernel`: everything needed to get from "a Jupyter server URL" to
//! "a live channel into a fresh kernel".
//!
//! # Provisioning flow
//!
//! ```text
//!  RestControlPlane            Bootstrapper                 ZmqChannel
//!  ────────────────            ────────────                 ──────────
//!  POST /api/kernels  ──id──▶  ws(s)://…/api/kernels/{id}/channels
//!                              execute "find + print my connection file"
//!                              collect stream until status:idle
//!                              parse ConnectionDescriptor ──────▶ DEALER shell
//!                                                                 SUB    iopub
//!                                                                 kernel_info until ready
//! ```
//!
//! Both channel kinds implement [`ExecutionChannel`]; the relay can also
//! serve as the long-lived channel when kernel ports are unreachable
//! (`data_plane.mode = "relay"`).

pub mod bootstrap;
pub mod channel;
pub mod connector;
pub mod control;
pub mod relay;
pub mod wire;
pub mod zmq;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use bootstrap::Bootstrapper;
pub use channel::{collect_reply, run_program, ExecutionChannel};
pub use connector::{KernelConnector, RemoteConnector};
pub use control::{from_reqwest, ControlPlane, RestControlPlane};
pub use relay::{relay_url, RelayChannel};
pub use wire::Signer;
pub use zmq::ZmqChannel;
