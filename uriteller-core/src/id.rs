// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Page ID generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Bits of randomness in a freshly minted id.
pub const ID_BITS: usize = 128;

/// Length of an id minted with [`ID_BITS`] bits (unpadded base64).
pub const ID_LEN: usize = 22;

/// Generate a new page id with [`ID_BITS`] bits of randomness.
pub fn generate_id() -> String {
    generate_id_with_bits(ID_BITS)
}

/// Generate an id with at least `bits` bits of randomness.
///
/// The result only contains characters from `[A-Za-z0-9_-]`.
pub fn generate_id_with_bits(bits: usize) -> String {
    let mut bytes = vec![0u8; (bits + 7) / 8];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Whether `s` has the shape of an id minted by [`generate_id`].
pub fn is_page_id(s: &str) -> bool {
    s.len() == ID_LEN
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
