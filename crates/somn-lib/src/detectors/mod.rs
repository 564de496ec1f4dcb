pub mod arousal;
pub mod channel;
pub mod envelope;
pub mod slowwave;

pub use channel::{Detection, Detector};

use crate::event::Event;

/// What one pipeline produced on one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelEvents {
    pub events: Vec<Event>,
    /// Detection threshold, for methods that derive one.
    pub det_value: Option<f64>,
    /// Selection threshold, for methods that derive one.
    pub sel_value: Option<f64>,
}
