use std::time::Duration;

use dmapipe_transport::DeviceProps;

/// Default size of each posted receive buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Default grace period before bring-up, allowing the peer processor's
/// own boot to finish.
pub const DEFAULT_INIT_DELAY: Duration = Duration::from_secs(40);

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Size of each posted receive buffer. Frames longer than this are
    /// truncated by the transport.
    pub buffer_size: usize,
    /// Delay before the one-shot transport bring-up.
    pub init_delay: Duration,
    /// Depth of the deferred-work queue between completion context and
    /// the worker thread.
    pub queue_depth: usize,
    /// Maximum outstanding TX descriptors.
    pub max_in_flight: usize,
    /// Shared device description handed to the transport at bring-up.
    pub device: DeviceProps,
    /// Device pipe index of the outbound endpoint.
    pub tx_pipe_index: u32,
    /// Device pipe index of the inbound endpoint.
    pub rx_pipe_index: u32,
    /// Size of each endpoint's private descriptor region in bytes.
    pub descriptor_region: usize,
    /// Completion event threshold for both endpoints.
    pub event_threshold: u32,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            init_delay: DEFAULT_INIT_DELAY,
            queue_depth: 64,
            max_in_flight: 32,
            device: DeviceProps {
                phys_base: 0x124C_2000,
                window_size: 0x2000,
                irq: 0,
                num_pipes: 6,
                summing_threshold: 4096,
            },
            tx_pipe_index: 4,
            rx_pipe_index: 5,
            descriptor_region: 0x800,
            event_threshold: 0x10,
        }
    }
}

impl MuxConfig {
    /// Configuration suited to in-process transports: no bring-up grace
    /// period beyond scheduling latency.
    pub fn immediate() -> Self {
        Self {
            init_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_expectations() {
        let config = MuxConfig::default();

        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.init_delay, Duration::from_secs(40));
        assert_eq!(config.device.num_pipes, 6);
        assert_eq!(config.descriptor_region / 8, 256);
        assert_ne!(config.tx_pipe_index, config.rx_pipe_index);
    }

    #[test]
    fn immediate_profile_skips_the_grace_period() {
        assert_eq!(MuxConfig::immediate().init_delay, Duration::ZERO);
    }
}
