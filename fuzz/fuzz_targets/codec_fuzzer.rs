//! Fuzz target for the length-delimited CBOR codec
//!
//! # Strategy
//!
//! - Raw byte streams fed to the incremental decoder, frame after frame
//! - Both message directions, with the harness ledger as payload
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A decoded or rejected frame is consumed from the buffer
//! - An incomplete frame leaves the buffer untouched
//! - A decoded message re-encodes to a frame that decodes to the same value

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use lockstep_harness::{LedgerEvent, LedgerState};
use lockstep_proto::{ClientMessage, ProtocolError, ServerMessage, codec};
use serde::{Serialize, de::DeserializeOwned};

fn drain<T>(data: &[u8])
where
    T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let mut buf = BytesMut::from(data);

    loop {
        let before = buf.len();
        match codec::decode::<T>(&mut buf) {
            Ok(Some(message)) => {
                assert!(buf.len() < before, "decoded frame must be consumed");

                let mut reencoded = BytesMut::new();
                codec::encode(&message, &mut reencoded).expect("decoded message must re-encode");
                let again: Option<T> =
                    codec::decode(&mut reencoded).expect("re-encoded frame must decode");
                assert_eq!(again.as_ref(), Some(&message));
                assert!(reencoded.is_empty());
            },
            Ok(None) => {
                assert_eq!(buf.len(), before, "incomplete frame must stay buffered");
                break;
            },
            Err(ProtocolError::Decode(_)) => {
                assert!(buf.len() < before, "rejected frame must be consumed");
            },
            Err(_) => break,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    drain::<ClientMessage<LedgerEvent>>(data);
    drain::<ServerMessage<LedgerState, LedgerEvent>>(data);
});
