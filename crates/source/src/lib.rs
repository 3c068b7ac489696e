pub mod logfile;

use bs_protocol::Frame;
use crossbeam::channel::Sender;

pub use logfile::{parse_line, read_frames, LogFileSource, ParseError};

/// Common trait for receiver capture sources
pub trait FrameSource: Send {
    /// Stream frames into the channel in capture order.
    /// Runs until the input is exhausted, stop() is called, or an error occurs.
    fn start(&mut self, tx: Sender<Frame>) -> Result<(), String>;

    /// Signal the source to stop streaming
    fn stop(&mut self);
}
