use crate::error::{SshError, SshResult};

/// Credit based flow control of one channel
///
/// The local window shrinks with every byte the peer sends us and only grows
/// back once the consumer reported the bytes as processed, so a slow reader
/// keeps the peer throttled.
#[derive(Debug)]
pub(crate) struct FlowControl {
    /// 本地窗口大小
    local_window: u32,
    local_initial: u32,
    /// consumed but not yet handed back to the peer
    local_pending: u32,
    /// 远程窗口大小
    remote_window: u32,
    remote_max_packet: u32,
}

impl FlowControl {
    pub fn new(local_window: u32) -> Self {
        FlowControl {
            local_window,
            local_initial: local_window,
            local_pending: 0,
            remote_window: 0,
            remote_max_packet: 0,
        }
    }

    /// the peer's window becomes known once the open handshake finished
    pub fn set_remote(&mut self, remote_window: u32, remote_max_packet: u32) {
        self.remote_window = remote_window;
        self.remote_max_packet = remote_max_packet;
    }

    pub fn local_window(&self) -> u32 {
        self.local_window
    }

    pub fn remote_window(&self) -> u32 {
        self.remote_window
    }

    /// account for `len` incoming bytes, before they are delivered
    pub fn on_recv(&mut self, len: usize) -> SshResult<()> {
        if len > self.local_window as usize {
            let err_msg = format!(
                "peer sent {} bytes while the window only allows {}",
                len, self.local_window
            );
            tracing::error!(err_msg);
            return Err(SshError::ProtocolViolation(err_msg));
        }
        self.local_window -= len as u32;
        Ok(())
    }

    /// the consumer freed `len` bytes
    ///
    /// Returns the amount to advertise in a window adjust, if one is due.
    pub fn on_consumed(&mut self, len: u32) -> Option<u32> {
        let ceiling = self.local_initial - self.local_window;
        self.local_pending = self.local_pending.saturating_add(len).min(ceiling);

        let low_water = self.local_initial - self.local_initial / 2;
        if self.local_pending > 0 && self.local_window < low_water {
            let to_add = self.local_pending;
            self.local_window += to_add;
            self.local_pending = 0;
            Some(to_add)
        } else {
            None
        }
    }

    /// split off what can not be sent now and return it
    pub fn tune_on_send(&mut self, buf: &mut Vec<u8>) -> Vec<u8> {
        let can_send = buf
            .len()
            .min(self.remote_window as usize)
            .min(self.remote_max_packet as usize);

        self.remote_window -= can_send as u32;

        buf.split_off(can_send)
    }

    pub fn on_window_adjust(&mut self, size: u32) -> SshResult<()> {
        match self.remote_window.checked_add(size) {
            Some(w) => {
                self.remote_window = w;
                Ok(())
            }
            None => Err(SshError::ProtocolViolation(
                "window adjust overflows 2^32 - 1".to_owned(),
            )),
        }
    }

    pub fn can_send(&self) -> bool {
        self.remote_window > 0 && self.remote_max_packet > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceeding_the_window_is_fatal() {
        let mut fc = FlowControl::new(32768);
        fc.on_recv(32768).unwrap();
        assert_eq!(fc.local_window(), 0);
        assert!(matches!(fc.on_recv(1), Err(SshError::ProtocolViolation(_))));
        // nothing was taken by the failed call
        assert_eq!(fc.local_window(), 0);
    }

    #[test]
    fn no_adjust_before_consumption() {
        let mut fc = FlowControl::new(100);
        fc.on_recv(80).unwrap();
        assert_eq!(fc.on_consumed(0), None);
        assert_eq!(fc.on_consumed(30), Some(30));
        assert_eq!(fc.local_window(), 50);
        // above half again, keep the credit
        assert_eq!(fc.on_consumed(20), None);
        fc.on_recv(10).unwrap();
        assert_eq!(fc.on_consumed(0), Some(20));
        assert_eq!(fc.local_window(), 60);
    }

    #[test]
    fn consumed_credit_is_capped() {
        let mut fc = FlowControl::new(10);
        fc.on_recv(10).unwrap();
        assert_eq!(fc.on_consumed(1000), Some(10));
        assert_eq!(fc.local_window(), 10);
    }

    #[test]
    fn send_respects_window_and_packet() {
        let mut fc = FlowControl::new(10);
        fc.set_remote(10, 4);
        let mut buf = vec![0_u8; 12];
        let remain = fc.tune_on_send(&mut buf);
        assert_eq!(buf.len(), 4);
        assert_eq!(remain.len(), 8);
        assert_eq!(fc.remote_window(), 6);
        fc.on_window_adjust(u32::MAX - 6).unwrap();
        assert!(fc.on_window_adjust(1).is_err());
    }
}
