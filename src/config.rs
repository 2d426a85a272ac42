use std::time::Duration;

use crate::record::MAX_PLAINTEXT_LEN;
use crate::trace::{MatchPolicy, SkipPolicy};
use crate::Error;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    max_record_size: usize,
    max_datagram_size: usize,
    receive_timeout: Duration,
    connect_timeout: Duration,
    wait_only_for_expected: bool,
    stop_on_fatal_alert: bool,
    flush_on_content_type_change: bool,
    max_retransmits: usize,
    skip_policy: SkipPolicy,
    allow_unexpected_trailing: bool,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            max_record_size: MAX_PLAINTEXT_LEN,
            allow_oversized_records: false,
            max_datagram_size: 1400,
            receive_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            wait_only_for_expected: true,
            stop_on_fatal_alert: true,
            flush_on_content_type_change: true,
            max_retransmits: 0,
            skip_policy: SkipPolicy::Anywhere,
            allow_unexpected_trailing: false,
            rng_seed: None,
        }
    }

    /// Max plaintext bytes per outgoing record.
    ///
    /// Payloads are split across records of at most this size.
    #[inline(always)]
    pub fn max_record_size(&self) -> usize {
        self.max_record_size
    }

    /// Max bytes per outgoing DTLS datagram.
    ///
    /// Records are packed into datagrams up to this size, and handshake
    /// messages are fragmented so each record fits.
    #[inline(always)]
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Max time a single transport read may block.
    #[inline(always)]
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Max time to establish a connection.
    #[inline(always)]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Stop reading as soon as every required message of a receive action
    /// arrived, instead of reading until the peer goes quiet.
    #[inline(always)]
    pub fn wait_only_for_expected(&self) -> bool {
        self.wait_only_for_expected
    }

    /// Halt the trace after receiving a fatal alert.
    #[inline(always)]
    pub fn stop_on_fatal_alert(&self) -> bool {
        self.stop_on_fatal_alert
    }

    /// Let consecutive messages with the same content type share records.
    ///
    /// When false, every message gets its own record(s).
    #[inline(always)]
    pub fn flush_on_content_type_change(&self) -> bool {
        self.flush_on_content_type_change
    }

    /// Number of times the last DTLS flight is resent when a receive action
    /// times out without any input.
    #[inline(always)]
    pub fn max_retransmits(&self) -> usize {
        self.max_retransmits
    }

    /// How actual messages are matched against configured ones.
    #[inline(always)]
    pub fn match_policy(&self) -> MatchPolicy {
        MatchPolicy {
            skip: self.skip_policy,
            allow_unexpected_trailing: self.allow_unexpected_trailing,
        }
    }

    /// Seed for hello randoms and session ids.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for engine configuration.
pub struct ConfigBuilder {
    max_record_size: usize,
    allow_oversized_records: bool,
    max_datagram_size: usize,
    receive_timeout: Duration,
    connect_timeout: Duration,
    wait_only_for_expected: bool,
    stop_on_fatal_alert: bool,
    flush_on_content_type_change: bool,
    max_retransmits: usize,
    skip_policy: SkipPolicy,
    allow_unexpected_trailing: bool,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the max plaintext bytes per outgoing record.
    ///
    /// Defaults to 16384.
    pub fn max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Allow `max_record_size` beyond 16384, producing records a conforming
    /// peer must reject.
    ///
    /// Defaults to false.
    pub fn allow_oversized_records(mut self, allow: bool) -> Self {
        self.allow_oversized_records = allow;
        self
    }

    /// Set the max bytes per outgoing DTLS datagram.
    ///
    /// Defaults to 1400.
    pub fn max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Set the max time a single transport read may block.
    ///
    /// Defaults to 1 second.
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the max time to establish a connection.
    ///
    /// Defaults to 5 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set whether receive actions stop once the required messages arrived.
    ///
    /// Defaults to true.
    pub fn wait_only_for_expected(mut self, wait: bool) -> Self {
        self.wait_only_for_expected = wait;
        self
    }

    /// Set whether a received fatal alert halts the trace.
    ///
    /// Defaults to true.
    pub fn stop_on_fatal_alert(mut self, stop: bool) -> Self {
        self.stop_on_fatal_alert = stop;
        self
    }

    /// Set whether same-type consecutive messages share records.
    ///
    /// Defaults to true.
    pub fn flush_on_content_type_change(mut self, flush: bool) -> Self {
        self.flush_on_content_type_change = flush;
        self
    }

    /// Set the number of DTLS flight retransmissions per receive action.
    ///
    /// Defaults to 0.
    pub fn max_retransmits(mut self, retransmits: usize) -> Self {
        self.max_retransmits = retransmits;
        self
    }

    /// Set where optional messages may be missing.
    ///
    /// Defaults to [`SkipPolicy::Anywhere`].
    pub fn skip_policy(mut self, policy: SkipPolicy) -> Self {
        self.skip_policy = policy;
        self
    }

    /// Set whether extra messages after the configured ones still count as
    /// executed as planned.
    ///
    /// Defaults to false.
    pub fn allow_unexpected_trailing(mut self, allow: bool) -> Self {
        self.allow_unexpected_trailing = allow;
        self
    }

    /// Set the seed for hello randoms and session ids.
    ///
    /// Defaults to none (non-deterministic).
    pub fn rng_seed(mut self, seed: Option<u64>) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::ConfigError` for sizes the record layer cannot honor.
    pub fn build(self) -> Result<Config, Error> {
        if self.max_record_size == 0 {
            return Err(Error::ConfigError("max_record_size must be at least 1".into()));
        }
        if self.max_record_size > MAX_PLAINTEXT_LEN && !self.allow_oversized_records {
            return Err(Error::ConfigError(format!(
                "max_record_size {} exceeds {} (see allow_oversized_records)",
                self.max_record_size, MAX_PLAINTEXT_LEN
            )));
        }
        // Leaves room for the largest protection overhead in the u16 length.
        if self.max_record_size > u16::MAX as usize - 2048 {
            return Err(Error::ConfigError(format!(
                "max_record_size {} does not fit a record",
                self.max_record_size
            )));
        }
        if self.max_datagram_size < 64 {
            return Err(Error::ConfigError(format!(
                "max_datagram_size {} is too small",
                self.max_datagram_size
            )));
        }

        Ok(self.finish())
    }

    fn finish(self) -> Config {
        Config {
            max_record_size: self.max_record_size,
            max_datagram_size: self.max_datagram_size,
            receive_timeout: self.receive_timeout,
            connect_timeout: self.connect_timeout,
            wait_only_for_expected: self.wait_only_for_expected,
            stop_on_fatal_alert: self.stop_on_fatal_alert,
            flush_on_content_type_change: self.flush_on_content_type_change,
            max_retransmits: self.max_retransmits,
            skip_policy: self.skip_policy,
            allow_unexpected_trailing: self.allow_unexpected_trailing,
            rng_seed: self.rng_seed,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // The builder defaults always validate.
        Config::builder().finish()
    }
}
