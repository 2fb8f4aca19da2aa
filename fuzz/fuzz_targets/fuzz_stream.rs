#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use opcua_uacp::config::{ClientConfig, ServerConfig};
use opcua_uacp::core::codec::UacpCodec;
use opcua_uacp::protocol::handshake::{Handshake, Step};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed a byte stream through the framing codec into both handshake roles
    let mut codec = UacpCodec::default();
    let mut buf = BytesMut::from(data);
    let mut server = Handshake::server(&ServerConfig::default());
    let mut client = Handshake::client(&ClientConfig::default());
    let _ = client.start();

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(message)) => {
                let to_client = message.clone();
                if let Step::Closed { .. } = server.receive(message) {
                    break;
                }
                let _ = client.receive(to_client);
            }
            Ok(None) => break,
            Err(err) => {
                let _ = server.fail(err);
                break;
            }
        }
    }
});
