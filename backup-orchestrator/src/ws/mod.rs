pub mod log_broadcast;
pub mod stream;

pub use log_broadcast::{ChannelSink, LogBroadcaster, LogRelay, StreamSink};
pub use stream::log_stream_handler;
