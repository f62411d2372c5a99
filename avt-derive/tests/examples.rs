// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Packet codecs expanded by the attribute macros.

use avt_derive::{avt, avt_inline};
use avt_runtime::{Bytes, Decode, Encode};

#[test]
fn test_session_start_file() {
    #[avt("src/test_valid.json")]
    mod packets {}

    use packets::*;

    let packet = SessionStart { version: 7 };
    let encoded = packet.encode_to_vec().unwrap();
    assert_eq!(encoded, vec![0x42, 0x42, 0x07]);

    let decoded = SessionStart::decode(&Bytes::from(encoded)).unwrap();
    assert_eq!(decoded.packet, packet);
    assert_eq!(decoded.len, 3);
    assert_eq!(header_size(PktDescriptor::SESSION_START), Some(3));
}

#[test]
fn test_inline_items_are_kept() {
    #[avt_inline(
        r##"{
  "descriptors": [ { "codes": "'0x0001'", "anchor": "#ping" } ],
  "structs": {
    "0x0001": [
      { "type": "u(16)", "name": "ping_descriptor", "value": "0x0001" },
      { "type": "u(32)", "name": "seq" }
    ]
  }
}"##
    )]
    mod ping {
        pub fn next(packet: &Ping) -> Ping {
            Ping { seq: packet.seq + 1 }
        }
    }

    let packet = ping::next(&ping::Ping { seq: 41 });
    assert_eq!(packet.seq, 42);
    assert_eq!(ping::PacketData::from(packet).seq(), Some(42));
}
