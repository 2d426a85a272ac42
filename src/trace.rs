//! Action traces: what to send and what to expect, in order.
//!
//! A [`Trace`] is built (and mutated between runs) by whoever decides what
//! to send a peer. The engine executes it and leaves an
//! [`ActionResult`] on every action it reached. Whether the peer behaved as
//! planned is then a pure function of the trace and a [`MatchPolicy`].

use std::fmt;

use crate::message::{MessageKind, ObservedMessage, ProtocolMessage};
use crate::record::Record;
use crate::types::ContentType;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// What a configured message slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    Kind(MessageKind),
    /// Any run of messages: one or more, or zero or more when optional.
    Any,
}

/// One planned message of an action.
pub struct ConfiguredMessage {
    message: Option<Box<dyn ProtocolMessage>>,
    expected: Expected,
    required: bool,
}

impl ConfiguredMessage {
    /// A message to send.
    pub fn send(message: impl ProtocolMessage + 'static) -> Self {
        Self::send_boxed(Box::new(message))
    }

    pub fn send_boxed(message: Box<dyn ProtocolMessage>) -> Self {
        ConfiguredMessage {
            expected: Expected::Kind(message.kind()),
            message: Some(message),
            required: true,
        }
    }

    /// A message to receive.
    pub fn expect(kind: MessageKind) -> Self {
        ConfiguredMessage {
            message: None,
            expected: Expected::Kind(kind),
            required: true,
        }
    }

    /// Any messages to receive.
    pub fn wildcard() -> Self {
        ConfiguredMessage {
            message: None,
            expected: Expected::Any,
            required: true,
        }
    }

    /// Mark as not required for the action to count as executed as planned.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn message(&self) -> Option<&dyn ProtocolMessage> {
        self.message.as_deref()
    }

    pub fn expected(&self) -> Expected {
        self.expected
    }

    pub fn is_required(&self) -> bool {
        self.required
    }
}

impl fmt::Debug for ConfiguredMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfiguredMessage")
            .field("expected", &self.expected)
            .field("required", &self.required)
            .field("has_message", &self.message.is_some())
            .finish()
    }
}

/// Something off about received data that did not stop the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A record that did not decrypt and was taken as plaintext.
    NullFallback {
        content_type: ContentType,
        epoch: Option<u16>,
        sequence_number: u64,
    },
    /// Bytes that did not parse as a message of their content type.
    MalformedMessage {
        content_type: ContentType,
        reason: String,
    },
    /// Received bytes that never formed a complete record or message.
    Leftover(usize),
    /// The peer closed the connection.
    PeerClosed,
}

/// What an action actually did.
#[derive(Debug, Default)]
pub struct ActionResult {
    pub messages: Vec<ObservedMessage>,
    pub records: Vec<Record>,
    pub anomalies: Vec<Anomaly>,
}

impl ActionResult {
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.messages.iter().map(|m| m.kind).collect()
    }
}

/// One step of a trace.
#[derive(Debug)]
pub struct Action {
    direction: Direction,
    alias: String,
    messages: Vec<ConfiguredMessage>,
    may_fail: bool,
    result: Option<ActionResult>,
}

impl Action {
    pub fn send(alias: &str, messages: Vec<ConfiguredMessage>) -> Self {
        Self::new(Direction::Send, alias, messages)
    }

    pub fn receive(alias: &str, messages: Vec<ConfiguredMessage>) -> Self {
        Self::new(Direction::Receive, alias, messages)
    }

    fn new(direction: Direction, alias: &str, messages: Vec<ConfiguredMessage>) -> Self {
        Action {
            direction,
            alias: alias.to_string(),
            messages,
            may_fail: false,
            result: None,
        }
    }

    /// Exclude this action from the executed-as-planned verdict.
    pub fn may_fail(mut self) -> Self {
        self.may_fail = true;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn messages(&self) -> &[ConfiguredMessage] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<ConfiguredMessage> {
        &mut self.messages
    }

    pub fn is_may_fail(&self) -> bool {
        self.may_fail
    }

    pub fn result(&self) -> Option<&ActionResult> {
        self.result.as_ref()
    }

    pub fn is_executed(&self) -> bool {
        self.result.is_some()
    }

    /// Store the execution result. Only one result per run.
    pub fn set_result(&mut self, result: ActionResult) -> Result<(), Error> {
        if self.result.is_some() {
            return Err(Error::ActionAlreadyExecuted);
        }
        self.result = Some(result);
        Ok(())
    }

    pub fn reset(&mut self) {
        self.result = None;
    }

    /// Whether `actual` matches the configured messages under `policy`.
    pub fn matches(&self, actual: &[MessageKind], policy: &MatchPolicy) -> bool {
        match_slots(&self.messages, actual, policy)
    }

    /// Whether the action ran and matched. Unexecuted actions did not.
    pub fn executed_as_planned(&self, policy: &MatchPolicy) -> bool {
        match &self.result {
            Some(result) => self.matches(&result.kinds(), policy),
            None => false,
        }
    }
}

/// Where configured optional messages may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SkipPolicy {
    /// Any optional message may be missing.
    #[default]
    Anywhere,
    /// Once an optional message is missing, everything after it must be
    /// optional and missing too.
    TrailingOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchPolicy {
    pub skip: SkipPolicy,
    /// Accept messages beyond the configured ones.
    pub allow_unexpected_trailing: bool,
}

fn match_slots(slots: &[ConfiguredMessage], actual: &[MessageKind], policy: &MatchPolicy) -> bool {
    let states = (slots.len() + 1) * (actual.len() + 1) * 2;
    Matcher {
        slots,
        actual,
        policy,
        memo: vec![None; states],
    }
    .at(0, 0, false)
}

/// Backtracking slot matcher, memoized on (slot, position, skipping).
struct Matcher<'a> {
    slots: &'a [ConfiguredMessage],
    actual: &'a [MessageKind],
    policy: &'a MatchPolicy,
    memo: Vec<Option<bool>>,
}

impl Matcher<'_> {
    fn at(&mut self, slot: usize, pos: usize, skipping: bool) -> bool {
        let key = (slot * (self.actual.len() + 1) + pos) * 2 + skipping as usize;
        if let Some(matched) = self.memo[key] {
            return matched;
        }
        let matched = self.step(slot, pos, skipping);
        self.memo[key] = Some(matched);
        matched
    }

    fn step(&mut self, slot: usize, pos: usize, skipping: bool) -> bool {
        let slots = self.slots;
        let Some(configured) = slots.get(slot) else {
            return pos == self.actual.len() || self.policy.allow_unexpected_trailing;
        };

        if !skipping {
            let consumed = match configured.expected {
                Expected::Kind(kind) => {
                    self.actual.get(pos) == Some(&kind) && self.at(slot + 1, pos + 1, false)
                }
                // Greedy, longest run first.
                Expected::Any => (pos + 1..=self.actual.len())
                    .rev()
                    .any(|end| self.at(slot + 1, end, false)),
            };
            if consumed {
                return true;
            }
        }

        !configured.required
            && self.at(slot + 1, pos, self.policy.skip == SkipPolicy::TrailingOnly)
    }
}

/// Ordered actions.
#[derive(Debug, Default)]
pub struct Trace {
    actions: Vec<Action>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn with(mut self, action: Action) -> Self {
        self.push(action);
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut Vec<Action> {
        &mut self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drop all execution results.
    pub fn reset(&mut self) {
        for action in &mut self.actions {
            action.reset();
        }
    }

    /// Whether every action, apart from those that may fail, executed and
    /// produced the configured messages.
    pub fn executed_as_planned(&self, policy: &MatchPolicy) -> bool {
        self.actions
            .iter()
            .filter(|a| !a.may_fail)
            .all(|a| a.executed_as_planned(policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{HandshakeType, ServerHelloDone};

    const A: MessageKind = MessageKind::Handshake(HandshakeType::ClientHello);
    const B: MessageKind = MessageKind::Handshake(HandshakeType::ServerHello);
    const C: MessageKind = MessageKind::Handshake(HandshakeType::ServerHelloDone);
    const D: MessageKind = MessageKind::Alert;

    fn observed(kinds: &[MessageKind]) -> ActionResult {
        ActionResult {
            messages: kinds
                .iter()
                .map(|k| ObservedMessage::sent(*k, vec![]))
                .collect(),
            ..Default::default()
        }
    }

    fn receive(slots: Vec<ConfiguredMessage>, actual: &[MessageKind], policy: MatchPolicy) -> bool {
        Action::receive("c", slots).matches(actual, &policy)
    }

    fn plan(b_optional: bool, sent: &[MessageKind], received: &[MessageKind]) -> bool {
        let b = ConfiguredMessage::expect(B);
        let b = if b_optional { b.optional() } else { b };
        let mut trace = Trace::new()
            .with(Action::send("c", vec![ConfiguredMessage::expect(A)]))
            .with(Action::receive("c", vec![b, ConfiguredMessage::expect(C)]));
        trace.actions_mut()[0].set_result(observed(sent)).unwrap();
        trace.actions_mut()[1].set_result(observed(received)).unwrap();
        trace.executed_as_planned(&MatchPolicy::default())
    }

    #[test]
    fn planned_execution() {
        assert!(!plan(false, &[A], &[B]));
        assert!(plan(false, &[A], &[B, C]));
        assert!(plan(true, &[A], &[C]));
        assert!(!plan(false, &[A], &[C]));
        assert!(!plan(false, &[A], &[C, B]));
    }

    #[test]
    fn unexecuted_action_is_not_planned() {
        let mut trace = Trace::new()
            .with(Action::send("c", vec![ConfiguredMessage::send(ServerHelloDone)]))
            .with(Action::receive("c", vec![ConfiguredMessage::expect(B)]));
        trace.actions_mut()[0].set_result(observed(&[C])).unwrap();
        assert!(!trace.executed_as_planned(&MatchPolicy::default()));
    }

    #[test]
    fn may_fail_is_excluded() {
        let mut trace = Trace::new()
            .with(Action::receive("c", vec![ConfiguredMessage::expect(B)]))
            .with(Action::receive("c", vec![ConfiguredMessage::expect(C)]).may_fail());
        trace.actions_mut()[0].set_result(observed(&[B])).unwrap();
        trace.actions_mut()[1].set_result(observed(&[D])).unwrap();
        assert!(trace.executed_as_planned(&MatchPolicy::default()));
    }

    #[test]
    fn result_is_write_once_until_reset() {
        let mut trace = Trace::new().with(Action::receive("c", vec![]));
        let action = &mut trace.actions_mut()[0];
        action.set_result(observed(&[])).unwrap();
        assert!(matches!(
            action.set_result(observed(&[])),
            Err(Error::ActionAlreadyExecuted)
        ));
        trace.reset();
        assert!(!trace.actions()[0].is_executed());
        trace.actions_mut()[0].set_result(observed(&[B])).unwrap();
    }

    #[test]
    fn wildcard_runs() {
        let p = MatchPolicy::default();
        let any = ConfiguredMessage::wildcard;
        assert!(receive(vec![any()], &[A, B, C], p));
        assert!(!receive(vec![any()], &[], p));
        assert!(receive(vec![any().optional()], &[], p));
        assert!(receive(vec![any(), ConfiguredMessage::expect(C)], &[A, B, C], p));
        assert!(receive(vec![any(), ConfiguredMessage::expect(C)], &[C, C], p));
        assert!(!receive(vec![any(), ConfiguredMessage::expect(C)], &[C], p));
    }

    #[test]
    fn many_wildcards_over_a_long_run() {
        let p = MatchPolicy::default();
        let mut slots: Vec<_> = (0..24).map(|_| ConfiguredMessage::wildcard()).collect();
        slots.push(ConfiguredMessage::expect(D));
        let actual = [A; 80];
        assert!(!receive(slots, &actual, p));

        let mut slots: Vec<_> = (0..24).map(|_| ConfiguredMessage::wildcard()).collect();
        slots.push(ConfiguredMessage::expect(D));
        let mut actual = vec![A; 80];
        actual.push(D);
        assert!(receive(slots, &actual, p));
    }

    #[test]
    fn trailing_only_skips() {
        let anywhere = MatchPolicy::default();
        let trailing = MatchPolicy {
            skip: SkipPolicy::TrailingOnly,
            ..Default::default()
        };
        let slots = || {
            vec![
                ConfiguredMessage::expect(A),
                ConfiguredMessage::expect(B).optional(),
                ConfiguredMessage::expect(C).optional(),
            ]
        };
        assert!(receive(slots(), &[A, C], anywhere));
        assert!(!receive(slots(), &[A, C], trailing));
        assert!(receive(slots(), &[A, B], trailing));
        assert!(receive(slots(), &[A], trailing));
        assert!(receive(slots(), &[A, B, C], trailing));
    }

    #[test]
    fn unexpected_trailing() {
        let strict = MatchPolicy::default();
        let lenient = MatchPolicy {
            allow_unexpected_trailing: true,
            ..Default::default()
        };
        let slots = || vec![ConfiguredMessage::expect(B)];
        assert!(!receive(slots(), &[B, D], strict));
        assert!(receive(slots(), &[B, D], lenient));
        assert!(!receive(slots(), &[D, B], lenient));
    }
}
