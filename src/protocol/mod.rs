pub mod message;
pub mod transport;

pub use message::{
    Request, StepOptions, StepReply, MALMO_VERSION,
    decode_u32, decode_peek_done, encode_u32,
};
pub use transport::{Transport, send_frame, recv_frame, MAX_FRAME_SIZE};
