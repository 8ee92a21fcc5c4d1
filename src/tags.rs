//! Embedded audio metadata
//!
//! Reads the common text tags from:
//! - ID3v2.3/2.4 headers (MP3, AAC)
//! - Vorbis comments in FLAC and Ogg (Vorbis, Opus)
//! - RIFF `INFO` lists or an embedded ID3 chunk (WAV)
//! - iTunes-style `ilst` items (M4A)
//!
//! Anything else yields `None`.

use tracing::trace;

use crate::drive::AudioMetadata;

/// Parse tags from the start of an audio file
pub fn parse(data: &[u8]) -> Option<AudioMetadata> {
    let metadata = if data.starts_with(b"ID3") {
        parse_id3v2(data)?
    } else if data.starts_with(b"fLaC") {
        parse_flac(data)?
    } else if data.starts_with(b"OggS") {
        parse_ogg(data)?
    } else if data.starts_with(b"RIFF") {
        parse_wav(data)?
    } else if data.get(4..8) == Some(&b"ftyp"[..]) {
        parse_mp4(data)?
    } else {
        trace!("No recognized tag container");
        return None;
    };

    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}

fn synchsafe(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take(4)
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7f) as usize)
}

fn be_u32(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take(4)
        .fold(0usize, |acc, b| (acc << 8) | *b as usize)
}

fn le_u32(bytes: &[u8]) -> Option<usize> {
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw) as usize)
}

fn parse_id3v2(data: &[u8]) -> Option<AudioMetadata> {
    let header = data.get(..10)?;
    let version = header[3];
    if version != 3 && version != 4 {
        trace!(version, "Unsupported ID3v2 version");
        return None;
    }
    let flags = header[5];
    let tag_end = (10 + synchsafe(&header[6..10])).min(data.len());

    let mut pos = 10;
    if flags & 0x40 != 0 {
        let ext = data.get(pos..pos + 4)?;
        // v2.3 excludes the size field itself, v2.4 includes it
        pos += if version == 3 { 4 + be_u32(ext) } else { synchsafe(ext) };
    }

    let mut metadata = AudioMetadata::default();
    while pos + 10 <= tag_end {
        let frame = &data[pos..pos + 10];
        if frame[0] == 0 {
            break; // padding
        }
        let size = if version == 4 {
            synchsafe(&frame[4..8])
        } else {
            be_u32(&frame[4..8])
        };
        let body_start = pos + 10;
        let body_end = body_start + size;
        if body_end > tag_end {
            break;
        }

        let body = &data[body_start..body_end];
        let value = || decode_text_frame(body);
        match &frame[..4] {
            b"TIT2" => metadata.title = value(),
            b"TPE1" => metadata.artist = value(),
            b"TALB" => metadata.album = value(),
            b"TCON" => metadata.genre = value().map(|g| strip_genre_ref(&g)),
            b"TRCK" => metadata.track = value().and_then(|t| parse_track(&t)),
            b"TYER" | b"TDRC" => metadata.year = value().and_then(|y| parse_year(&y)),
            _ => {}
        }
        pos = body_end;
    }
    Some(metadata)
}

/// Text frame body: encoding byte, then the string. Only the first of
/// several null-separated values is kept.
fn decode_text_frame(body: &[u8]) -> Option<String> {
    let (&encoding, text) = body.split_first()?;
    let decoded = match encoding {
        0 => text.iter().map(|&b| b as char).collect::<String>(),
        1 => {
            let little_endian = !text.starts_with(&[0xfe, 0xff]);
            let text = if text.starts_with(&[0xff, 0xfe]) || text.starts_with(&[0xfe, 0xff]) {
                &text[2..]
            } else {
                text
            };
            decode_utf16(text, little_endian)
        }
        2 => decode_utf16(text, false),
        3 => String::from_utf8_lossy(text).into_owned(),
        _ => return None,
    };

    let first = decoded.split('\0').next().unwrap_or_default().trim();
    if first.is_empty() {
        None
    } else {
        Some(first.to_string())
    }
}

fn decode_utf16(bytes: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// "(17)Rock" -> "Rock"; a bare "(17)" stays as is
fn strip_genre_ref(genre: &str) -> String {
    if let Some(rest) = genre.strip_prefix('(') {
        if let Some((num, name)) = rest.split_once(')') {
            if num.chars().all(|c| c.is_ascii_digit()) && !name.is_empty() {
                return name.to_string();
            }
        }
    }
    genre.to_string()
}

/// "3/12" -> 3
fn parse_track(raw: &str) -> Option<u32> {
    raw.split('/').next()?.trim().parse().ok()
}

/// First four digits of a date-like string
fn parse_year(raw: &str) -> Option<String> {
    let year: String = raw.chars().take(4).collect();
    if year.len() == 4 && year.chars().all(|c| c.is_ascii_digit()) {
        Some(year)
    } else {
        None
    }
}

const FLAC_VORBIS_COMMENT: u8 = 4;

fn parse_flac(data: &[u8]) -> Option<AudioMetadata> {
    let mut pos = 4;
    loop {
        let header = data.get(pos..pos + 4)?;
        let is_last = header[0] & 0x80 != 0;
        let block_type = header[0] & 0x7f;
        let length = be_u32(&[0, header[1], header[2], header[3]]);
        let block = data.get(pos + 4..pos + 4 + length)?;

        if block_type == FLAC_VORBIS_COMMENT {
            return parse_vorbis_comments(block);
        }
        if is_last {
            trace!("FLAC stream has no Vorbis comment block");
            return None;
        }
        pos += 4 + length;
    }
}

fn parse_vorbis_comments(block: &[u8]) -> Option<AudioMetadata> {
    let vendor_len = le_u32(block)?;
    let mut pos = 4 + vendor_len;
    let count = le_u32(block.get(pos..)?)?;
    pos += 4;

    let mut metadata = AudioMetadata::default();
    for _ in 0..count {
        let len = le_u32(block.get(pos..)?)?;
        pos += 4;
        let comment = String::from_utf8_lossy(block.get(pos..pos + len)?);
        pos += len;

        let Some((key, value)) = comment.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        // First occurrence wins
        match key.to_ascii_uppercase().as_str() {
            "TITLE" if metadata.title.is_none() => metadata.title = Some(value.to_string()),
            "ARTIST" if metadata.artist.is_none() => metadata.artist = Some(value.to_string()),
            "ALBUM" if metadata.album.is_none() => metadata.album = Some(value.to_string()),
            "GENRE" if metadata.genre.is_none() => metadata.genre = Some(value.to_string()),
            "DATE" | "YEAR" if metadata.year.is_none() => metadata.year = parse_year(value),
            "TRACKNUMBER" if metadata.track.is_none() => metadata.track = parse_track(value),
            _ => {}
        }
    }
    Some(metadata)
}

const OGG_PAGE_HEADER_LEN: usize = 27;
/// Vorbis sends three header packets, Opus two
const OGG_HEADER_PACKETS: usize = 3;

fn parse_ogg(data: &[u8]) -> Option<AudioMetadata> {
    let mut packet = Vec::new();
    let mut packets = 0;
    let mut pos = 0;
    while data.get(pos..pos + 4)? == b"OggS" {
        let header = data.get(pos..pos + OGG_PAGE_HEADER_LEN)?;
        let table_start = pos + OGG_PAGE_HEADER_LEN;
        let table = data.get(table_start..table_start + header[26] as usize)?;
        let mut body = table_start + table.len();

        for &lacing in table {
            let lacing = lacing as usize;
            packet.extend_from_slice(data.get(body..body + lacing)?);
            body += lacing;
            // A lacing value under 255 ends the packet
            if lacing < 255 {
                let comments = packet
                    .strip_prefix(b"\x03vorbis")
                    .or_else(|| packet.strip_prefix(b"OpusTags"));
                if let Some(comments) = comments {
                    return parse_vorbis_comments(comments);
                }
                packets += 1;
                if packets == OGG_HEADER_PACKETS {
                    trace!("Ogg stream has no comment header");
                    return None;
                }
                packet.clear();
            }
        }
        pos = body;
    }
    None
}

fn parse_wav(data: &[u8]) -> Option<AudioMetadata> {
    if data.get(8..12)? != b"WAVE" {
        return None;
    }
    let mut pos = 12;
    while let Some(header) = data.get(pos..pos + 8) {
        let size = le_u32(&header[4..])?;
        let body = data.get(pos + 8..pos + 8 + size)?;
        match &header[..4] {
            b"LIST" if body.starts_with(b"INFO") => return Some(parse_riff_info(&body[4..])),
            b"id3 " | b"ID3 " => return parse_id3v2(body),
            _ => {}
        }
        // Chunks are word aligned
        pos += 8 + size + (size & 1);
    }
    trace!("WAV file has no INFO or ID3 chunk");
    None
}

fn parse_riff_info(list: &[u8]) -> AudioMetadata {
    let mut metadata = AudioMetadata::default();
    let mut pos = 0;
    while let Some(header) = list.get(pos..pos + 8) {
        let Some(size) = le_u32(&header[4..]) else {
            break;
        };
        let Some(body) = list.get(pos + 8..pos + 8 + size) else {
            break;
        };
        pos += 8 + size + (size & 1);

        let text = String::from_utf8_lossy(body);
        let value = text.trim_end_matches('\0').trim();
        if value.is_empty() {
            continue;
        }
        match &header[..4] {
            b"INAM" => metadata.title = Some(value.to_string()),
            b"IART" => metadata.artist = Some(value.to_string()),
            b"IPRD" => metadata.album = Some(value.to_string()),
            b"IGNR" => metadata.genre = Some(value.to_string()),
            b"ICRD" => metadata.year = parse_year(value),
            b"ITRK" | b"IPRT" => metadata.track = parse_track(value),
            _ => {}
        }
    }
    metadata
}

/// Child boxes of an MP4 container as (type, body) pairs
fn mp4_boxes<'a>(data: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let header = data.get(pos..pos + 8)?;
        // Zero means the box runs to the end; 64-bit sizes are not followed
        let size = match be_u32(header) {
            0 => data.len() - pos,
            size => size,
        };
        if size < 8 {
            return None;
        }
        let body = data.get(pos + 8..pos + size)?;
        pos += size;
        Some((&header[4..8], body))
    })
}

fn find_box<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
    mp4_boxes(data)
        .find(|(k, _)| *k == kind)
        .map(|(_, body)| body)
}

fn parse_mp4(data: &[u8]) -> Option<AudioMetadata> {
    let moov = find_box(data, b"moov")?;
    let meta = find_box(find_box(moov, b"udta")?, b"meta")?;
    // Version and flags precede the children of `meta`
    let ilst = find_box(meta.get(4..)?, b"ilst")?;

    let mut metadata = AudioMetadata::default();
    for (kind, item) in mp4_boxes(ilst) {
        // Type indicator and locale come before the value
        let Some(value) = find_box(item, b"data").and_then(|d| d.get(8..)) else {
            continue;
        };
        match kind {
            b"\xa9nam" => metadata.title = mp4_text(value),
            b"\xa9ART" => metadata.artist = mp4_text(value),
            b"\xa9alb" => metadata.album = mp4_text(value),
            b"\xa9gen" => metadata.genre = mp4_text(value),
            b"\xa9day" => metadata.year = mp4_text(value).and_then(|y| parse_year(&y)),
            b"trkn" => metadata.track = mp4_track(value),
            _ => {}
        }
    }
    Some(metadata)
}

fn mp4_text(value: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(value);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `trkn` payload: reserved u16, track u16, total u16
fn mp4_track(value: &[u8]) -> Option<u32> {
    let raw = value.get(2..4)?;
    let track = u16::from_be_bytes([raw[0], raw[1]]) as u32;
    (track > 0).then_some(track)
}
