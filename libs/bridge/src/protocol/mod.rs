//! Wire protocol: envelopes, the codec, and response classification

pub mod codec;
pub mod envelope;
pub mod response;

pub use codec::{Codec, Converter, ConverterTable};
pub use envelope::{Envelope, Payload, TypeTag};
pub use response::{
    strip_error_prefix, CallbackRequest, ErrorPayload, Outcome, RemoteFailure, Response,
};
