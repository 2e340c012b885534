//! JPEG marker scanning over an undelimited byte blob.

use std::ops::Range;

/// Start-of-image variants, tried in this order.
///
/// The longer variants include the first segment marker (JFIF APP0, EXIF
/// APP1, bare DQT) which makes false positives inside entropy-coded data
/// far less likely than the bare `FFD8`.
pub const SOI_VARIANTS: [&[u8]; 4] = [
    &[0xFF, 0xD8, 0xFF, 0xE0],
    &[0xFF, 0xD8, 0xFF, 0xE1],
    &[0xFF, 0xD8, 0xFF, 0xDB],
    &[0xFF, 0xD8],
];

/// End-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Finds `needle` in `haystack` at or after `from`.
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Carves candidate image ranges starting with `soi`.
///
/// Each range runs from a start marker to the first `FFD9` after it
/// (inclusive).  When no end marker follows, the range stops just before the
/// next start marker, or at the end of the blob.  Ranges no longer than
/// `min_len` are dropped.
pub fn candidate_ranges(blob: &[u8], soi: &[u8], min_len: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut pos = 0;
    while let Some(start) = find(blob, soi, pos) {
        let end = match find(blob, &EOI, start + soi.len()) {
            Some(eoi) => eoi + EOI.len(),
            None => find(blob, soi, start + 1).unwrap_or(blob.len()),
        };
        if end - start > min_len {
            ranges.push(start..end);
        }
        pos = end.max(start + 1);
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_respects_offset() {
        let hay = [1, 2, 3, 1, 2, 3];

        assert_eq!(find(&hay, &[1, 2], 0), Some(0));
        assert_eq!(find(&hay, &[1, 2], 1), Some(3));
        assert_eq!(find(&hay, &[9], 0), None);
        assert_eq!(find(&hay, &[1], 6), None);
    }

    #[test]
    fn test_candidate_ranges_uses_end_marker() {
        // Arrange
        let mut blob = vec![0x00, 0xFF, 0xD8, 0xFF, 0xE0, 0x11, 0x22, 0xFF, 0xD9, 0x33];

        // Act
        let ranges = candidate_ranges(&blob, SOI_VARIANTS[0], 0);

        // Assert
        assert_eq!(ranges, vec![1..9]);

        // A second image without an end marker runs to the blob end.
        blob.extend([0xFF, 0xD8, 0xFF, 0xE0, 0x44]);
        assert_eq!(candidate_ranges(&blob, SOI_VARIANTS[0], 0), vec![1..9, 10..15]);
    }

    #[test]
    fn test_candidate_ranges_stops_before_next_start_without_end_marker() {
        let blob = [0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0xFF, 0xD8, 0xFF, 0xE0, 0x02];

        let ranges = candidate_ranges(&blob, SOI_VARIANTS[0], 0);

        assert_eq!(ranges, vec![0..5, 5..10]);
    }

    #[test]
    fn test_candidate_ranges_drops_short_slices() {
        let blob = [0xFF, 0xD8, 0xFF, 0xE0, 0xFF, 0xD9];

        assert!(candidate_ranges(&blob, SOI_VARIANTS[0], 6).is_empty());
        assert_eq!(candidate_ranges(&blob, SOI_VARIANTS[0], 5), vec![0..6]);
    }
}
