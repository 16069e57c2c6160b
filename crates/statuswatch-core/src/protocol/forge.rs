//! Forge mod-listing decoder
//!
//! Modded servers compress their mod and channel listing into a single JSON
//! string field (`forgeData.d`) by packing the raw bytes 15 bits per UTF-16
//! code unit. This module unpacks that string and walks the listing.
//!
//! Decoding is tolerant by contract: a malformed or truncated listing keeps
//! whatever was decoded before the error and never fails the surrounding
//! status poll. A partial decode is only worth a warning when the payload did
//! not declare itself truncated.

use crate::error::Result;
use crate::protocol::connection::{Connection, MemoryConnection};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Version string recorded for mods flagged as not required on clients.
pub const NOT_REQUIRED_FOR_CLIENT: &str = "<not required for client>";

/// Mod flag bit: the mod does not need to be present on the client, and no
/// version string follows in the listing.
const FLAG_IGNORE_SERVER_ONLY: i32 = 0b1;

/// One network channel advertised by a mod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub version: String,
    /// Whether the client must understand this channel to join.
    pub client_required: bool,
}

/// Decoded mod listing. `mods` maps mod id to version; `channels` is keyed
/// by (mod id, channel name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForgeData {
    /// True when the server declared the listing incomplete.
    pub truncated: bool,
    pub mods: BTreeMap<String, String>,
    pub channels: BTreeMap<(String, String), ChannelInfo>,
}

/// Unpack a 15-bits-per-character string into its raw bytes.
///
/// The first two characters carry the byte length as a little-endian pair of
/// 15-bit halves. Remaining characters feed a rolling bit accumulator that is
/// drained a byte at a time, then flushed until `size` bytes exist.
pub fn decode_optimized(data: &str) -> MemoryConnection {
    let units: Vec<u32> = data.chars().map(|c| c as u32 & 0x7FFF).collect();
    let unit = |i: usize| units.get(i).copied().unwrap_or(0);

    let size = (unit(0) | (unit(1) << 15)) as usize;
    let mut buffer = Vec::with_capacity(size);
    let mut value: u32 = 0;
    let mut bits: u32 = 0;

    for i in 2..units.len() {
        while bits >= 8 {
            buffer.push((value & 0xFF) as u8);
            value >>= 8;
            bits -= 8;
        }
        // bits < 8 here, so the accumulator never exceeds 22 bits
        value |= unit(i) << bits;
        bits += 15;
    }

    // Drain leftover bits, capped by the declared size: trailing zero bits
    // pad out the final byte, and a lying size prefix cannot run away.
    while bits >= 8 && buffer.len() < size {
        buffer.push((value & 0xFF) as u8);
        value >>= 8;
        bits -= 8;
    }
    if bits > 0 && buffer.len() < size {
        buffer.push((value & 0xFF) as u8);
    }

    MemoryConnection::from_received(buffer)
}

/// Decode a packed mod listing, keeping whatever parses on error.
pub fn decode_forge_payload(payload: &str) -> ForgeData {
    let mut buffer = decode_optimized(payload);
    let mut data = ForgeData::default();
    if let Err(err) = walk_listing(&mut buffer, &mut data) {
        // A truncated listing is expected to cut off mid-field.
        if data.truncated {
            debug!(error = %err, "mod listing ended early (declared truncated)");
        } else {
            warn!(error = %err, "partial mod listing decode");
        }
    }
    data
}

fn walk_listing(buffer: &mut MemoryConnection, data: &mut ForgeData) -> Result<()> {
    data.truncated = buffer.read_bool()?;
    let mod_count = buffer.read_ushort()?;

    for _ in 0..mod_count {
        let flags = buffer.read_varint()?;
        let ignore_server_only = flags & FLAG_IGNORE_SERVER_ONLY != 0;
        let channel_count = flags >> 1;

        let mod_id = buffer.read_utf()?;
        let version = if ignore_server_only {
            NOT_REQUIRED_FOR_CLIENT.to_string()
        } else {
            buffer.read_utf()?
        };

        for _ in 0..channel_count {
            let name = buffer.read_utf()?;
            let channel_version = buffer.read_utf()?;
            let client_required = buffer.read_bool()?;
            data.channels.insert(
                (mod_id.clone(), name),
                ChannelInfo {
                    version: channel_version,
                    client_required,
                },
            );
        }

        data.mods.insert(mod_id, version);
    }

    // Channels not owned by any listed mod, keyed "modId:channelName".
    let extra_count = buffer.read_varint()?;
    for _ in 0..extra_count {
        let key = buffer.read_utf()?;
        let channel_version = buffer.read_utf()?;
        let client_required = buffer.read_bool()?;
        let (mod_id, name) = key.split_once(':').unwrap_or((key.as_str(), ""));
        data.channels.insert(
            (mod_id.to_string(), name.to_string()),
            ChannelInfo {
                version: channel_version,
                client_required,
            },
        );
    }

    Ok(())
}

/// Replace a packed `forgeData.d` field in a status document with the
/// decoded `truncated`/`mods`/`channels` fields. Documents without the
/// packed field pass through untouched.
pub fn process_response(mut document: Value) -> Value {
    let payload = document
        .get("forgeData")
        .and_then(|forge| forge.get("d"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let Some(payload) = payload else {
        return document;
    };
    let data = decode_forge_payload(&payload);

    if let Some(forge) = document.get_mut("forgeData").and_then(Value::as_object_mut) {
        forge.remove("d");
        forge.insert("truncated".into(), Value::Bool(data.truncated));
        forge.insert(
            "mods".into(),
            Value::Object(
                data.mods
                    .into_iter()
                    .map(|(id, version)| (id, Value::String(version)))
                    .collect(),
            ),
        );
        let mut channels = Map::new();
        for ((mod_id, name), info) in data.channels {
            channels.insert(
                format!("{mod_id}:{name}"),
                json!({
                    "version": info.version,
                    "client_required": info.client_required,
                }),
            );
        }
        forge.insert("channels".into(), Value::Object(channels));
    }

    document
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of `decode_optimized`, for building test payloads.
    fn encode_optimized(data: &[u8]) -> String {
        let size = data.len() as u32;
        let mut out = String::new();
        out.push(char::from_u32(size & 0x7FFF).unwrap());
        out.push(char::from_u32(size >> 15).unwrap());

        let mut value: u32 = 0;
        let mut bits: u32 = 0;
        for &byte in data {
            value |= u32::from(byte) << bits;
            bits += 8;
            if bits >= 15 {
                out.push(char::from_u32(value & 0x7FFF).unwrap());
                value >>= 15;
                bits -= 15;
            }
        }
        if bits > 0 {
            out.push(char::from_u32(value).unwrap());
        }
        out
    }

    fn packed_listing() -> String {
        let mut listing = MemoryConnection::new();
        listing.write_bool(false).unwrap();
        listing.write_ushort(2).unwrap();

        // two channels, version required
        listing.write_varint(2 << 1).unwrap();
        listing.write_utf("examplemod").unwrap();
        listing.write_utf("1.2.3").unwrap();
        listing.write_utf("main").unwrap();
        listing.write_utf("1").unwrap();
        listing.write_bool(true).unwrap();
        listing.write_utf("net").unwrap();
        listing.write_utf("2").unwrap();
        listing.write_bool(false).unwrap();

        // client-only mod, no version field
        listing.write_varint(0b1).unwrap();
        listing.write_utf("clientmod").unwrap();

        listing.write_varint(1).unwrap();
        listing.write_utf("minecraft:brand").unwrap();
        listing.write_utf("1").unwrap();
        listing.write_bool(false).unwrap();

        encode_optimized(&listing.flush())
    }

    #[test]
    fn size_prefix_with_truncated_flag_only() {
        // two declared bytes: a `true` bool, then padding
        let data = decode_forge_payload("\u{02}\u{00}\u{01}");
        assert!(data.truncated);
        assert!(data.mods.is_empty());
        assert!(data.channels.is_empty());
    }

    #[test]
    fn full_listing_round_trip() {
        let data = decode_forge_payload(&packed_listing());
        assert!(!data.truncated);
        assert_eq!(data.mods["examplemod"], "1.2.3");
        assert_eq!(data.mods["clientmod"], NOT_REQUIRED_FOR_CLIENT);

        let main = &data.channels[&("examplemod".to_string(), "main".to_string())];
        assert_eq!(main.version, "1");
        assert!(main.client_required);

        let brand = &data.channels[&("minecraft".to_string(), "brand".to_string())];
        assert_eq!(brand.version, "1");
        assert!(!brand.client_required);
    }

    #[test]
    fn garbage_payload_keeps_partial_result() {
        let data = decode_forge_payload("\u{7FFF}\u{7FFF}");
        assert!(!data.truncated);
        assert!(data.mods.is_empty());
    }

    #[test]
    fn process_response_replaces_packed_field() {
        let document = json!({
            "version": {"name": "1.20.1"},
            "forgeData": {"fmlNetworkVersion": 3, "d": packed_listing()},
        });
        let processed = process_response(document);
        let forge = &processed["forgeData"];
        assert!(forge.get("d").is_none());
        assert_eq!(forge["truncated"], false);
        assert_eq!(forge["mods"]["examplemod"], "1.2.3");
        assert_eq!(forge["channels"]["examplemod:main"]["version"], "1");
        assert_eq!(forge["fmlNetworkVersion"], 3);
    }

    #[test]
    fn process_response_passes_plain_documents_through() {
        let document = json!({"players": {"online": 0, "max": 20}});
        assert_eq!(process_response(document.clone()), document);
    }
}
