//! Frame codec: decoders for inbound console frames and builders for the
//! outbound acknowledgements/commands the engine sends back.

pub mod inbound;
pub mod outbound;

pub use inbound::{
    decode_config, decode_current_weather, decode_history, parse_header, CurrentReading,
    DeviceConfig, FrameHeader, HistoryBlock, HistoryRecord, ResponseType, SensorChannel,
};
pub use outbound::{
    build_ack_frame, build_first_config_frame, build_time_frame, is_near_minute_boundary,
    morph_action, quantised_time_interval, Action,
};
