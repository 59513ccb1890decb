use tracing::{trace, warn};

use crate::message::types::{peer_bw_limit_type, DEFAULT_WINDOW_ACK_SIZE};

/// Tracks the acknowledgement window the peer asked for and decides when
/// a cumulative-byte acknowledgement is due. Byte counts come from the
/// chunk decoder, so handshake bytes are never counted.
pub struct FlowController {
    window_ack_size: u32,
    peer_bandwidth: u32,
    peer_bandwidth_limit: u8,
    total_input_bytes: u64,
    bytes_since_last_ack: u64,
}

impl FlowController {
    pub fn new() -> Self {
        Self {
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth_limit: peer_bw_limit_type::HARD,
            total_input_bytes: 0,
            bytes_since_last_ack: 0,
        }
    }

    /// Feeds the decoder's cumulative input byte count. Returns the
    /// sequence number to acknowledge when at least one full window has
    /// been consumed since the last acknowledgement.
    pub fn on_bytes_received(&mut self, total: u64) -> Option<u32> {
        let delta = total.saturating_sub(self.total_input_bytes);
        self.total_input_bytes = total;
        self.bytes_since_last_ack += delta;

        let window = self.window_ack_size as u64;
        if self.bytes_since_last_ack >= window {
            self.bytes_since_last_ack %= window;
            trace!("Window consumed, acknowledging {} bytes", total);
            return Some(total as u32);
        }
        None
    }

    pub fn window_ack_size(&self) -> u32 {
        self.window_ack_size
    }

    pub fn set_window_ack_size(&mut self, size: u32) {
        if size == 0 {
            warn!("Ignore window_ack_size 0");
            return;
        }
        trace!("Window acknowledgement size set to {}", size);
        self.window_ack_size = size;
    }

    pub fn peer_bandwidth(&self) -> u32 {
        self.peer_bandwidth
    }

    pub fn set_peer_bandwidth(&mut self, bandwidth: u32, limit_type: u8) {
        match limit_type {
            peer_bw_limit_type::HARD => {
                self.peer_bandwidth = bandwidth;
                self.peer_bandwidth_limit = limit_type;
            }
            peer_bw_limit_type::SOFT => {
                self.peer_bandwidth = self.peer_bandwidth.min(bandwidth);
                self.peer_bandwidth_limit = limit_type;
            }
            peer_bw_limit_type::DYNAMIC => {
                // dynamic only takes effect while the previous limit was hard
                if self.peer_bandwidth_limit == peer_bw_limit_type::HARD {
                    self.peer_bandwidth = bandwidth;
                }
            }
            other => warn!("Unknown peer bandwidth limit type {}", other),
        }
    }
}

impl Default for FlowController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acknowledges_once_per_window() {
        let mut flow = FlowController::new();
        flow.set_window_ack_size(100);

        assert_eq!(flow.on_bytes_received(50), None);
        assert_eq!(flow.on_bytes_received(120), Some(120));
        assert_eq!(flow.on_bytes_received(199), None);
        assert_eq!(flow.on_bytes_received(220), Some(220));
    }

    #[test]
    fn burst_spanning_windows_acknowledges_the_latest_total() {
        let mut flow = FlowController::new();
        flow.set_window_ack_size(100);

        assert_eq!(flow.on_bytes_received(350), Some(350));
        assert_eq!(flow.on_bytes_received(390), None);
        assert_eq!(flow.on_bytes_received(460), Some(460));
    }

    #[test]
    fn zero_window_is_ignored() {
        let mut flow = FlowController::new();
        flow.set_window_ack_size(0);
        assert_eq!(flow.window_ack_size(), DEFAULT_WINDOW_ACK_SIZE);
    }

    #[test]
    fn soft_limit_only_lowers_bandwidth() {
        let mut flow = FlowController::new();
        flow.set_peer_bandwidth(1_000, peer_bw_limit_type::HARD);
        flow.set_peer_bandwidth(5_000, peer_bw_limit_type::SOFT);
        assert_eq!(flow.peer_bandwidth(), 1_000);
        flow.set_peer_bandwidth(500, peer_bw_limit_type::SOFT);
        assert_eq!(flow.peer_bandwidth(), 500);

        // previous limit is soft, so dynamic is ignored
        flow.set_peer_bandwidth(9_000, peer_bw_limit_type::DYNAMIC);
        assert_eq!(flow.peer_bandwidth(), 500);
    }
}
