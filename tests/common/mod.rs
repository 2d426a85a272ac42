#![allow(unused)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tlsprobe::message::{frame, ProtocolMessage};
use tlsprobe::timer::Sleep;
use tlsprobe::transport::{Connector, Received, Transport};
use tlsprobe::{ConnectionContext, Error, RecordCodec};

type Queue = Arc<Mutex<VecDeque<Vec<u8>>>>;

/// One end of an in-memory connection.
///
/// In stream mode a read returns everything queued, like a socket read
/// after the peer wrote several times. In datagram mode a read returns one
/// send of the peer.
pub struct PipeEnd {
    inbox: Queue,
    outbox: Queue,
    datagram: bool,
    /// Sends to drop before delivering, to simulate loss.
    drop_sends: usize,
    /// Read the newest datagram first.
    newest_first: bool,
}

impl PipeEnd {
    pub fn dropping(mut self, sends: usize) -> Self {
        self.drop_sends = sends;
        self
    }

    /// Deliver queued datagrams in reverse order.
    pub fn reordering(mut self) -> Self {
        self.newest_first = true;
        self
    }
}

pub fn pipe(datagram: bool) -> (PipeEnd, PipeEnd) {
    let a = Queue::default();
    let b = Queue::default();
    (
        PipeEnd {
            inbox: a.clone(),
            outbox: b.clone(),
            datagram,
            drop_sends: 0,
            newest_first: false,
        },
        PipeEnd {
            inbox: b,
            outbox: a,
            datagram,
            drop_sends: 0,
            newest_first: false,
        },
    )
}

impl Transport for PipeEnd {
    fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.drop_sends > 0 {
            self.drop_sends -= 1;
            return Ok(());
        }
        self.outbox.lock().unwrap().push_back(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, _max_wait: Duration) -> Result<Received, Error> {
        let mut inbox = self.inbox.lock().unwrap();
        if inbox.is_empty() {
            return Ok(Received::Timeout);
        }
        if self.datagram {
            let next = if self.newest_first {
                inbox.pop_back()
            } else {
                inbox.pop_front()
            };
            return Ok(Received::Data(next.unwrap()));
        }
        Ok(Received::Data(inbox.drain(..).flatten().collect()))
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Replays canned input and ignores what is sent.
pub struct Scripted {
    replies: VecDeque<Received>,
}

impl Scripted {
    pub fn new(replies: Vec<Received>) -> Self {
        Scripted {
            replies: replies.into(),
        }
    }
}

impl Transport for Scripted {
    fn send(&mut self, _data: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn receive(&mut self, _max_wait: Duration) -> Result<Received, Error> {
        Ok(self.replies.pop_front().unwrap_or(Received::Timeout))
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Hands out one scripted transport per connect, or refuses.
///
/// `None` entries refuse the connection. When the plan runs out, every
/// further connect gets the last entry again.
#[derive(Clone)]
pub struct ScriptedConnector {
    plan: Arc<Mutex<VecDeque<Option<Vec<Received>>>>>,
    pub connects: Arc<Mutex<usize>>,
}

impl ScriptedConnector {
    pub fn new(plan: Vec<Option<Vec<Received>>>) -> Self {
        ScriptedConnector {
            plan: Arc::new(Mutex::new(plan.into())),
            connects: Arc::default(),
        }
    }
}

impl Connector for ScriptedConnector {
    fn connect(&mut self, ctx: &ConnectionContext) -> Result<Box<dyn Transport>, Error> {
        *self.connects.lock().unwrap() += 1;
        let mut plan = self.plan.lock().unwrap();
        let next = if plan.len() > 1 {
            plan.pop_front().unwrap()
        } else {
            plan.front().cloned().unwrap()
        };
        match next {
            Some(replies) => Ok(Box::new(Scripted::new(replies))),
            None => Err(Error::Connect(format!("{} refused", ctx.alias()))),
        }
    }
}

/// Records the sleeps instead of sleeping.
#[derive(Clone, Default)]
pub struct NoSleep(pub Arc<Mutex<Vec<Duration>>>);

impl Sleep for NoSleep {
    fn sleep(&mut self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

/// Records for `msg` as `peer` would put them on the wire.
pub fn peer_records(peer: &mut ConnectionContext, msg: &dyn ProtocolMessage) -> Vec<u8> {
    let body = msg.serialize(peer).unwrap();
    let kind = msg.kind();
    let payload = match kind.handshake_type() {
        Some(t) => {
            let seq = peer.is_dtls().then(|| peer.take_message_seq());
            frame(t, &body, seq, usize::MAX).message
        }
        None => body,
    };
    let mut out = Vec::new();
    for r in RecordCodec::default()
        .encode_outbound(&payload, kind.content_type(), peer)
        .unwrap()
    {
        r.serialize(&mut out);
    }
    out
}
