//! Concrete stream transports: TCP (listener + connected socket) and
//! anonymous pipes. Both implement [`crate::stream::RawStream`] and are
//! otherwise driven entirely by the generic state machine in
//! [`crate::stream`].

pub mod pipe;
pub mod tcp;
