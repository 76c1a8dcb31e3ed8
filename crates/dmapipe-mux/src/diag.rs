use std::fmt;

/// Read-only open state for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub id: u8,
    pub local_open: bool,
    pub remote_open: bool,
}

impl ChannelStatus {
    /// Usable for data transfer.
    pub fn is_open(&self) -> bool {
        self.local_open && self.remote_open
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{:02}  local open={}  remote open={}",
            self.id,
            if self.local_open { "Y" } else { "N" },
            if self.remote_open { "Y" } else { "N" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_the_status_table() {
        let status = ChannelStatus {
            id: 3,
            local_open: true,
            remote_open: false,
        };

        assert_eq!(status.to_string(), "ch03  local open=Y  remote open=N");
        assert!(!status.is_open());
    }
}
