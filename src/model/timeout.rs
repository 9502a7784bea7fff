use crate::{SshError, SshResult};
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u64 = 1_000_000_000;
/// idle polling never sleeps longer than this
const MAX_IDLE_NANOS: u64 = 10_000_000;

/// exponential back-off used by every polling loop over a non-blocking stream
pub(crate) struct Timeout {
    instant: Instant,
    timeout: Option<Duration>,
    wait_tick: u64,
    max_tick: u64,
}

impl Timeout {
    pub fn new(timeout: Option<Duration>) -> Self {
        Timeout {
            instant: Instant::now(),
            timeout,
            wait_tick: 1,
            max_tick: NANOS_PER_SEC,
        }
    }

    /// a back-off for idle loops without deadline
    pub fn idle() -> Self {
        Timeout {
            max_tick: MAX_IDLE_NANOS,
            ..Self::new(None)
        }
    }

    fn wait(&mut self) -> u64 {
        let sleep_time = Duration::from_nanos(self.wait_tick);
        std::thread::sleep(sleep_time);
        if self.wait_tick < self.max_tick {
            self.wait_tick <<= 1;
        }

        if let Some(timeout) = self.timeout {
            let timeout_nanos = timeout.as_nanos();
            let used_nanos = self.instant.elapsed().as_nanos();

            self.wait_tick = {
                if timeout_nanos > used_nanos && timeout_nanos - used_nanos < self.wait_tick as u128
                {
                    (timeout_nanos - used_nanos) as u64
                } else {
                    self.wait_tick
                }
            };
        }
        self.wait_tick
    }

    pub fn till_next_tick(&mut self) -> SshResult<()> {
        if let Some(t) = self.timeout {
            if self.instant.elapsed() > t {
                tracing::error!("time out.");
                return Err(SshError::TimeoutError);
            }
        }
        self.wait();
        Ok(())
    }

    /// progress was made, restart both the back-off and the deadline
    pub fn renew(&mut self) {
        self.wait_tick = 1;
        self.instant = Instant::now();
    }
}
