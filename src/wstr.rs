//! UTF-16 code-unit conversions for the host metadata surface.
//!
//! Host strings are sequences of 16-bit code units regardless of the
//! platform's wide-char width; the filesystem and the log stay UTF-8.

/// Encodes `s` as UTF-16 with a trailing NUL, for host slots that take a
/// terminated wide string.
pub fn to_utf16z(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(core::iter::once(0)).collect()
}

/// Encodes `s` as UTF-16 without a terminator, for host slots that take an
/// explicit character count.
pub fn to_utf16(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Decodes a host-filled buffer, stopping at the first NUL.
pub fn from_utf16_buf(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_round_trip() {
        let wide = to_utf16z("UprootedHook.Entry");
        assert_eq!(wide.len(), "UprootedHook.Entry".len() + 1);
        assert_eq!(wide.last(), Some(&0));
        assert_eq!(from_utf16_buf(&wide), "UprootedHook.Entry");
    }

    #[test]
    fn counted_form_has_no_terminator() {
        let wide = to_utf16(".local/share/uprooted");
        assert!(!wide.contains(&0));
    }

    #[test]
    fn decode_stops_at_first_nul() {
        let buf = [0x52, 0x6f, 0x6f, 0x74, 0, 0x58, 0x58];
        assert_eq!(from_utf16_buf(&buf), "Root");
    }

    #[test]
    fn decode_survives_supplementary_planes() {
        let wide = to_utf16("pay\u{1F512}load");
        assert_eq!(from_utf16_buf(&wide), "pay\u{1F512}load");
    }
}
