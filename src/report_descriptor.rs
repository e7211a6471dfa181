//! Top-level usage extraction from a HID report descriptor.
//!
//! Report descriptors are treated as opaque bytes everywhere else. The only
//! thing read out of them is the Usage Page / Usage pair that labels the
//! first top-level collection, which enumeration reports on the descriptor.

const ITEM_USAGE_PAGE: u8 = 0x04;
const ITEM_USAGE: u8 = 0x08;
const ITEM_COLLECTION: u8 = 0xA0;
const ITEM_END_COLLECTION: u8 = 0xC0;
const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Usage Page and Usage of the first top-level collection, if any.
///
/// Extended (4-byte) usages carry their own page in the high word, which
/// overrides the current global Usage Page.
pub fn top_level_usage(desc: &[u8]) -> Option<(u16, u16)> {
    let mut i = 0usize;
    let mut usage_page: Option<u16> = None;
    let mut usage: Option<(Option<u16>, u16)> = None;
    let mut depth = 0usize;

    while i < desc.len() {
        let prefix = desc[i];

        if prefix == LONG_ITEM_PREFIX {
            let size = *desc.get(i + 1)? as usize;
            i += 3 + size;
            continue;
        }

        let size = match prefix & 0x03 {
            0 => 0,
            1 => 1,
            2 => 2,
            _ => 4,
        };
        let data = desc.get(i + 1..i + 1 + size)?;
        let value = data
            .iter()
            .enumerate()
            .fold(0u32, |acc, (n, b)| acc | (u32::from(*b) << (8 * n)));

        match prefix & 0xFC {
            ITEM_USAGE_PAGE => usage_page = Some(value as u16),
            ITEM_USAGE if depth == 0 && usage.is_none() => {
                usage = if size == 4 {
                    Some((Some((value >> 16) as u16), value as u16))
                } else {
                    Some((None, value as u16))
                };
            }
            ITEM_COLLECTION => {
                if depth == 0 {
                    if let Some((page, u)) = usage {
                        return Some((page.or(usage_page)?, u));
                    }
                }
                depth += 1;
            }
            ITEM_END_COLLECTION => depth = depth.saturating_sub(1),
            _ => {}
        }

        i += 1 + size;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_descriptor() {
        // Usage Page (Generic Desktop), Usage (Keyboard), Collection (Application)
        let desc = [0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0x05, 0x07, 0xC0];
        assert_eq!(top_level_usage(&desc), Some((0x01, 0x06)));
    }

    #[test]
    fn vendor_page_two_byte() {
        // Usage Page (0xFF60), Usage (0x61), Collection (Application)
        let desc = [0x06, 0x60, 0xFF, 0x09, 0x61, 0xA1, 0x01, 0xC0];
        assert_eq!(top_level_usage(&desc), Some((0xFF60, 0x61)));
    }

    #[test]
    fn extended_usage_overrides_page() {
        // Usage (extended: page 0x000C, usage 0x0001), Collection
        let desc = [0x0B, 0x01, 0x00, 0x0C, 0x00, 0xA1, 0x01, 0xC0];
        assert_eq!(top_level_usage(&desc), Some((0x0C, 0x01)));
    }

    #[test]
    fn long_items_are_skipped() {
        let desc = [0xFE, 0x02, 0x10, 0xAA, 0xBB, 0x05, 0x0C, 0x09, 0x01, 0xA1, 0x01];
        assert_eq!(top_level_usage(&desc), Some((0x0C, 0x01)));
    }

    #[test]
    fn truncated_or_empty() {
        assert_eq!(top_level_usage(&[]), None);
        assert_eq!(top_level_usage(&[0x06, 0x60]), None);
        // Collection without a preceding usage.
        assert_eq!(top_level_usage(&[0x05, 0x01, 0xA1, 0x01, 0xC0]), None);
    }
}
