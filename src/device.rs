//! Simulated smart TV appliance
//!
//! A single shared instance owned by the server. All state lives behind one
//! mutex so each operation is atomic with respect to concurrent callers.
//!
//! Note: `channel_up`/`channel_down` do not check the power state, while the
//! other channel operations do.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt::Display;

const POWERED_OFF: &str = "Smart TV is off | Unable to complete this request";

/// Result of a device operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReply {
    pub success: bool,
    pub message: String,
    /// New active channel, set only when the operation changed it
    pub channel_changed: Option<u32>,
}

impl DeviceReply {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            channel_changed: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            channel_changed: None,
        }
    }

    fn changed(channel: u32, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            channel_changed: Some(channel),
        }
    }
}

#[derive(Debug)]
struct TvState {
    is_on: bool,
    total_channels: u32,
    /// Always within `1..=total_channels`
    active_channel: u32,
}

/// The appliance model
#[derive(Debug)]
pub struct SmartTv {
    state: Mutex<TvState>,
}

impl SmartTv {
    /// Create a powered-off TV tuned to channel 1
    pub fn new(total_channels: u32) -> Result<Self> {
        if total_channels == 0 {
            return Err(Error::InvalidParameter(
                "total_channels must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            state: Mutex::new(TvState {
                is_on: false,
                total_channels,
                active_channel: 1,
            }),
        })
    }

    pub fn turn_on(&self) -> DeviceReply {
        let mut state = self.state.lock();
        if state.is_on {
            return DeviceReply::fail("Smart TV is already turned on");
        }
        state.is_on = true;
        DeviceReply::ok("Smart TV is turned on")
    }

    pub fn turn_off(&self) -> DeviceReply {
        let mut state = self.state.lock();
        if !state.is_on {
            return DeviceReply::fail("Smart TV is already turned off");
        }
        state.is_on = false;
        DeviceReply::ok("Smart TV is turned off")
    }

    /// Power state report; never fails
    pub fn status(&self) -> DeviceReply {
        let state = self.state.lock();
        let power = if state.is_on { "on" } else { "off" };
        DeviceReply::ok(format!("Smart TV is {}", power))
    }

    pub fn total_channels_report(&self) -> DeviceReply {
        let state = self.state.lock();
        if !state.is_on {
            return DeviceReply::fail(POWERED_OFF);
        }
        DeviceReply::ok(format!("Total number of channels: {}", state.total_channels))
    }

    pub fn active_channel_report(&self) -> DeviceReply {
        let state = self.state.lock();
        if !state.is_on {
            return DeviceReply::fail(POWERED_OFF);
        }
        DeviceReply::ok(format!("Active channel: {}", state.active_channel))
    }

    /// Tune to `channel`; requires power and a channel in `1..=total_channels`
    pub fn set_channel(&self, channel: i64) -> DeviceReply {
        let mut state = self.state.lock();
        if !state.is_on {
            return DeviceReply::fail(POWERED_OFF);
        }
        if channel < 1 || channel > i64::from(state.total_channels) {
            return out_of_range(channel, state.total_channels);
        }
        // In range, so it fits in u32
        state.active_channel = channel as u32;
        DeviceReply::changed(
            state.active_channel,
            format!("Active channel set to: {}", state.active_channel),
        )
    }

    /// Reject a channel number too large to tune to, given as decimal text
    pub fn reject_channel(&self, channel: &str) -> DeviceReply {
        let state = self.state.lock();
        if !state.is_on {
            return DeviceReply::fail(POWERED_OFF);
        }
        out_of_range(channel, state.total_channels)
    }

    pub fn channel_down(&self) -> DeviceReply {
        let mut state = self.state.lock();
        if state.active_channel == 1 {
            return DeviceReply::fail("Channel cannot go any lower than channel 1");
        }
        state.active_channel -= 1;
        DeviceReply::changed(
            state.active_channel,
            format!("Channel went down to {}", state.active_channel),
        )
    }

    pub fn channel_up(&self) -> DeviceReply {
        let mut state = self.state.lock();
        if state.active_channel == state.total_channels {
            return DeviceReply::fail(format!(
                "Channel cannot go any higher than channel {}",
                state.total_channels
            ));
        }
        state.active_channel += 1;
        DeviceReply::changed(
            state.active_channel,
            format!("Channel went up to {}", state.active_channel),
        )
    }

    pub fn is_on(&self) -> bool {
        self.state.lock().is_on
    }

    pub fn active_channel(&self) -> u32 {
        self.state.lock().active_channel
    }

    pub fn total_channels(&self) -> u32 {
        self.state.lock().total_channels
    }
}

fn out_of_range(channel: impl Display, total_channels: u32) -> DeviceReply {
    DeviceReply::fail(format!(
        "Channel {} is out of range, valid range: 1-{}",
        channel, total_channels
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn powered(total: u32) -> SmartTv {
        let tv = SmartTv::new(total).unwrap();
        assert!(tv.turn_on().success);
        tv
    }

    #[test]
    fn test_new_rejects_zero_channels() {
        assert!(matches!(SmartTv::new(0), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_initial_state() {
        let tv = SmartTv::new(120).unwrap();
        assert!(!tv.is_on());
        assert_eq!(tv.active_channel(), 1);
        assert_eq!(tv.total_channels(), 120);
        assert_eq!(tv.status().message, "Smart TV is off");
    }

    #[test]
    fn test_turn_on_twice() {
        let tv = SmartTv::new(10).unwrap();
        let first = tv.turn_on();
        assert!(first.success);
        assert_eq!(first.message, "Smart TV is turned on");

        let second = tv.turn_on();
        assert!(!second.success);
        assert_eq!(second.message, "Smart TV is already turned on");
        assert!(tv.is_on());
    }

    #[test]
    fn test_turn_off_when_off() {
        let tv = SmartTv::new(10).unwrap();
        let reply = tv.turn_off();
        assert!(!reply.success);
        assert!(reply.message.contains("already turned off"));

        tv.turn_on();
        assert!(tv.turn_off().success);
        assert!(!tv.is_on());
    }

    #[test]
    fn test_reports_require_power() {
        let tv = SmartTv::new(120).unwrap();
        for reply in [tv.total_channels_report(), tv.active_channel_report()] {
            assert!(!reply.success);
            assert!(reply.message.contains("TV is off | Unable to complete this request"));
        }

        tv.turn_on();
        assert_eq!(
            tv.total_channels_report().message,
            "Total number of channels: 120"
        );
        assert_eq!(tv.active_channel_report().message, "Active channel: 1");
    }

    #[test]
    fn test_set_channel_full_range() {
        let tv = powered(25);
        for v in 1..=25 {
            let reply = tv.set_channel(v);
            assert!(reply.success, "channel {} should be accepted", v);
            assert_eq!(reply.channel_changed, Some(v as u32));
            assert_eq!(tv.active_channel_report().message, format!("Active channel: {}", v));
        }
    }

    #[test]
    fn test_set_channel_out_of_range() {
        let tv = powered(120);
        tv.set_channel(7);

        let above = tv.set_channel(121);
        assert!(!above.success);
        assert_eq!(above.message, "Channel 121 is out of range, valid range: 1-120");
        assert_eq!(above.channel_changed, None);

        assert!(!tv.set_channel(0).success);
        assert!(!tv.set_channel(-3).success);
        assert_eq!(tv.active_channel(), 7);
    }

    #[test]
    fn test_set_channel_requires_power() {
        let tv = SmartTv::new(10).unwrap();
        let reply = tv.set_channel(5);
        assert!(!reply.success);
        assert_eq!(tv.active_channel(), 1);
    }

    #[test]
    fn test_reject_channel() {
        let tv = SmartTv::new(10).unwrap();
        assert_eq!(tv.reject_channel("99999999999999999999").message, POWERED_OFF);

        tv.turn_on();
        let reply = tv.reject_channel("99999999999999999999");
        assert!(!reply.success);
        assert_eq!(
            reply.message,
            "Channel 99999999999999999999 is out of range, valid range: 1-10"
        );
        assert_eq!(reply.channel_changed, None);
        assert_eq!(tv.active_channel(), 1);
    }

    #[test]
    fn test_channel_bounds() {
        let tv = powered(3);
        let down = tv.channel_down();
        assert!(!down.success);
        assert_eq!(down.message, "Channel cannot go any lower than channel 1");
        assert_eq!(tv.active_channel(), 1);

        tv.set_channel(3);
        let up = tv.channel_up();
        assert!(!up.success);
        assert_eq!(up.message, "Channel cannot go any higher than channel 3");
        assert_eq!(tv.active_channel(), 3);

        let down = tv.channel_down();
        assert_eq!(down.message, "Channel went down to 2");
        assert_eq!(down.channel_changed, Some(2));
    }

    #[test]
    fn test_up_down_ignore_power_state() {
        let tv = SmartTv::new(5).unwrap();
        let up = tv.channel_up();
        assert!(up.success);
        assert_eq!(up.message, "Channel went up to 2");
        assert!(tv.channel_down().success);
        assert!(!tv.is_on());
    }

    #[test]
    fn test_single_channel_device() {
        let tv = powered(1);
        assert!(!tv.channel_up().success);
        assert!(!tv.channel_down().success);
        assert!(tv.set_channel(1).success);
    }

    #[test]
    fn test_concurrent_channel_up_no_lost_updates() {
        let tv = Arc::new(SmartTv::new(1000).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tv = Arc::clone(&tv);
                thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(tv.channel_up().success);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tv.active_channel(), 401);
    }
}
