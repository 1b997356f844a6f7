//! sim-ecu - Request dispatch engine for simulated ECUs
//!
//! A [`SimEcu`] owns an ordered list of request matchers, inbound and
//! outbound interceptors, named timers and a property store. The network
//! layer feeds it raw UDS requests through [`SimEcu::on_incoming_request`]
//! and receives responses through a [`ResponseSink`].
//!
//! # Example
//!
//! ```ignore
//! use sim_ecu::{EcuConfig, RequestMatcher, SimEcu};
//!
//! let ecu = SimEcu::new(EcuConfig::new("engine", 0x1010));
//! ecu.add_matcher(RequestMatcher::exact("default-session", [0x10, 0x01], |ctx| ctx.ack()));
//! ```

pub mod busy;
pub mod config;
pub mod context;
pub mod control;
pub mod ecu;
pub mod error;
pub mod index;
pub mod interceptor;
pub mod matcher;
pub mod nrc;
pub mod pending;
pub mod sink;
pub mod store;
pub mod testing;
mod timer;

pub use busy::{BusyGate, BusyGuard};
pub use config::EcuConfig;
pub use context::{RequestContext, ResetScope};
pub use control::EntityControl;
pub use ecu::SimEcu;
pub use error::{HandlerError, MatcherError, SinkError};
pub use interceptor::{InboundInterceptor, OutboundContext, OutboundInterceptor};
pub use matcher::{MatcherList, RequestMatcher, RequestPattern, RequestView};
pub use sink::ResponseSink;
pub use store::PropertyStore;
