/// Errors reported by the frame codec and the telemetry decoder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The buffer does not hold a complete frame yet; keep reading.
    #[error("Incomplete frame")]
    Incomplete,
    /// The envelope around the payload is malformed.
    #[error("Framing error: {0}")]
    Framing(&'static str),
    /// The CRC carried by the frame does not match the recomputed one.
    #[error("Checksum mismatch - calculated={calculated:04X} received={received:04X}")]
    Checksum { calculated: u16, received: u16 },
    /// The frame carries a different opcode than the decoder expects.
    #[error("Unexpected opcode {received:#06X}, expected {expected:#06X}")]
    UnexpectedOpcode { expected: u16, received: u16 },
    /// The payload ends before the schedule does.
    #[error("Payload too short - required at least {required} bytes, received {received}")]
    ShortPayload { required: usize, received: usize },
    /// The payload declares zero cells.
    #[error("Payload declares no cells")]
    EmptyCellArray,
}
