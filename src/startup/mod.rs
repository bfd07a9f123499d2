//! Process startup: choosing a transport and running it.
//!
//! - [`probe`] checks whether an HTTP server already answers on an endpoint.
//! - [`selector`] decides between stdio and HTTP.
//! - [`serve`] bootstraps the chosen transport and handles shutdown.

pub mod probe;
pub mod selector;
pub mod serve;

pub use probe::{is_server_running, Endpoint, EndpointProbe, HttpProbe, PROBE_TIMEOUT};
pub use selector::{resolve_transport, select_transport, RuntimeContext};
pub use serve::{bootstrap_stdio, run, run_http, run_stdio, serve_http, shutdown_signal};
