//! tlsprobe
//!
//! Trace-driven TLS and DTLS session engine for exercising peers with planned,
//! and deliberately broken, traffic.
//!
//! A [`Trace`] lists what to send and what to expect. The [`Engine`] walks it
//! against a [`ConnectionContext`]: outgoing messages are serialized, framed
//! and protected by the record layer, incoming bytes are decoded record by
//! record with the cipher state of their epoch. Nothing a peer sends makes
//! the engine fail. Undecryptable records fall back to the null cipher,
//! unparseable messages end the trace, and both are recorded on the action
//! for inspection. Whether the peer did what was planned is then a question
//! asked of the executed trace.
//!
//! The [`RetryHarness`] wraps a run with bounded re-execution for peers that
//! are slow to come up or drop connections.
//!
//! ```no_run
//! use std::time::Duration;
//! use tlsprobe::message::{ClientHello, HandshakeType, MessageKind, Random};
//! use tlsprobe::transport::{Connector, TcpConnector};
//! use tlsprobe::types::{CipherSuite, ProtocolVersion, Role};
//! use tlsprobe::{Action, Config, ConfiguredMessage, ConnectionContext, Engine, Trace};
//!
//! let mut ctx = ConnectionContext::new("client", Role::Initiator, ProtocolVersion::TLS1_2);
//! let transport = TcpConnector::new("localhost:4433", Duration::from_secs(5))
//!     .connect(&ctx)
//!     .unwrap();
//! ctx.attach_transport(transport);
//!
//! let hello = ClientHello::new(
//!     ProtocolVersion::TLS1_2,
//!     Random([0; 32]),
//!     vec![CipherSuite::ECDHE_RSA_AES128_GCM_SHA256],
//! );
//! let mut trace = Trace::new()
//!     .with(Action::send("client", vec![ConfiguredMessage::send(hello)]))
//!     .with(Action::receive(
//!         "client",
//!         vec![ConfiguredMessage::expect(MessageKind::Handshake(HandshakeType::ServerHello))],
//!     ));
//!
//! let report = Engine::new(Config::default()).run(&mut trace, &mut ctx).unwrap();
//! println!("as planned: {}", report.executed_as_planned);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod config;
pub use config::{Config, ConfigBuilder};

mod context;
pub use context::ConnectionContext;

pub mod crypto;

mod engine;
pub use engine::{ActionReport, Engine, ExecutionReport, HaltReason};

mod error;
pub use error::Error;

pub mod message;

mod parallel;
pub use parallel::{execute_parallel, Job, JobResult};

pub mod record;
pub use record::{Record, RecordCodec};

pub mod retry;
pub use retry::{Outcome, RetryHarness, RetryPolicy, Verdict};

mod rng;
pub use rng::SeededRng;

pub mod timer;

pub mod trace;
pub use trace::{Action, ConfiguredMessage, MatchPolicy, SkipPolicy, Trace};

pub mod transport;

pub mod types;

mod util;
