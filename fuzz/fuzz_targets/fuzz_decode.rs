#![no_main]

use libfuzzer_sys::fuzz_target;
use opcua_uacp::protocol::message::Message;
use opcua_uacp::ChannelSecurityToken;

fuzz_target!(|data: &[u8]| {
    // Anything that decodes must re-encode to the same bytes
    if let Ok(message) = Message::decode(data) {
        assert_eq!(&message.to_bytes()[..], data);
    }
    let _ = ChannelSecurityToken::from_slice(data);
});
