//! Connection settings exchanged in SETTINGS frames.
//!
//! [`Settings`] is sparse: each parameter is either set or absent. Merging
//! copies only the parameters set on the other side, so a SETTINGS frame that
//! carries one value leaves every other value untouched.

/// Number of parameter slots tracked. Identifiers at or above this are ignored.
pub const COUNT: usize = 10;

/// Header compression table size advertised by the decoder.
pub const HEADER_TABLE_SIZE: u16 = 1;
/// Whether the peer may send PUSH_PROMISE frames.
pub const ENABLE_PUSH: u16 = 2;
/// Maximum number of streams the sender allows the peer to open.
pub const MAX_CONCURRENT_STREAMS: u16 = 3;
/// Initial stream-level flow-control window.
pub const INITIAL_WINDOW_SIZE: u16 = 4;
/// Largest frame payload the sender accepts.
pub const MAX_FRAME_SIZE: u16 = 5;
/// Advisory limit on the size of a decoded header list.
pub const MAX_HEADER_LIST_SIZE: u16 = 6;

/// Initial flow-control window assumed before any SETTINGS arrive.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
/// Frame payload limit assumed before any SETTINGS arrive.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
/// Header table size assumed before any SETTINGS arrive.
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;
/// Largest encoded header block accepted when [`MAX_HEADER_LIST_SIZE`] is
/// not set locally.
pub const DEFAULT_MAX_HEADER_LIST_SIZE: u32 = 256 * 1024;
/// Largest legal value for [`MAX_FRAME_SIZE`].
pub const MAX_MAX_FRAME_SIZE: u32 = 0x00ff_ffff;
/// Largest legal value for [`INITIAL_WINDOW_SIZE`].
pub const MAX_INITIAL_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Sparse mapping from settings identifiers to values.
///
/// # Examples
///
/// ```
/// use muxwire::settings::{self, Settings};
///
/// let mut local = Settings::new();
/// local.set(settings::INITIAL_WINDOW_SIZE, 1024);
/// let mut update = Settings::new();
/// update.set(settings::MAX_FRAME_SIZE, 32_768);
/// local.merge(&update);
/// assert_eq!(local.initial_window_size(), 1024);
/// assert_eq!(local.max_frame_size(), 32_768);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    set: u16,
    values: [u32; COUNT],
}

impl Settings {
    /// Create an empty set of settings.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Set `id` to `value`. Unknown identifiers are ignored.
    pub fn set(&mut self, id: u16, value: u32) -> &mut Self {
        let index = usize::from(id);
        if index < COUNT {
            self.set |= 1 << id;
            self.values[index] = value;
        }
        self
    }

    /// Returns `true` when `id` carries a value.
    #[must_use]
    pub fn is_set(&self, id: u16) -> bool {
        usize::from(id) < COUNT && self.set & (1 << id) != 0
    }

    /// Value for `id`, if set.
    #[must_use]
    pub fn get(&self, id: u16) -> Option<u32> {
        self.is_set(id).then(|| self.values[usize::from(id)])
    }

    /// Number of parameters carrying a value.
    #[must_use]
    pub fn len(&self) -> usize { self.set.count_ones() as usize }

    /// Returns `true` when no parameter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.set == 0 }

    /// Forget every value.
    pub fn clear(&mut self) {
        self.set = 0;
        self.values = [0; COUNT];
    }

    /// Copy every value set in `other` into `self`, leaving the rest as-is.
    pub fn merge(&mut self, other: &Settings) {
        for (id, value) in other.iter() {
            self.set(id, value);
        }
    }

    /// Iterate over `(id, value)` pairs in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u32)> + '_ {
        (0..COUNT as u16).filter_map(|id| self.get(id).map(|value| (id, value)))
    }

    /// Header table size, defaulting to [`DEFAULT_HEADER_TABLE_SIZE`].
    #[must_use]
    pub fn header_table_size(&self) -> u32 {
        self.get(HEADER_TABLE_SIZE)
            .unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    /// Whether push is enabled, defaulting to `default`.
    #[must_use]
    pub fn enable_push(&self, default: bool) -> bool {
        self.get(ENABLE_PUSH).map_or(default, |value| value == 1)
    }

    /// Maximum concurrent streams, defaulting to `default`.
    #[must_use]
    pub fn max_concurrent_streams(&self, default: u32) -> u32 {
        self.get(MAX_CONCURRENT_STREAMS).unwrap_or(default)
    }

    /// Initial window size, defaulting to [`DEFAULT_INITIAL_WINDOW_SIZE`].
    #[must_use]
    pub fn initial_window_size(&self) -> u32 {
        self.get(INITIAL_WINDOW_SIZE)
            .unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Maximum frame size, defaulting to [`DEFAULT_MAX_FRAME_SIZE`].
    #[must_use]
    pub fn max_frame_size(&self) -> u32 { self.get(MAX_FRAME_SIZE).unwrap_or(DEFAULT_MAX_FRAME_SIZE) }

    /// Maximum header list size, defaulting to `default`.
    #[must_use]
    pub fn max_header_list_size(&self, default: u32) -> u32 {
        self.get(MAX_HEADER_LIST_SIZE).unwrap_or(default)
    }
}

impl FromIterator<(u16, u32)> for Settings {
    fn from_iter<I: IntoIterator<Item = (u16, u32)>>(iter: I) -> Self {
        let mut settings = Settings::new();
        for (id, value) in iter {
            settings.set(id, value);
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn merge_overwrites_only_set_values() {
        let mut base: Settings = [(INITIAL_WINDOW_SIZE, 100), (MAX_FRAME_SIZE, 20_000)]
            .into_iter()
            .collect();
        let update: Settings = [(INITIAL_WINDOW_SIZE, 50)].into_iter().collect();
        base.merge(&update);
        assert_eq!(base.get(INITIAL_WINDOW_SIZE), Some(50));
        assert_eq!(base.get(MAX_FRAME_SIZE), Some(20_000));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn clear_then_merge_replaces_everything() {
        let mut base: Settings = [(MAX_CONCURRENT_STREAMS, 10)].into_iter().collect();
        base.clear();
        base.merge(&[(HEADER_TABLE_SIZE, 0)].into_iter().collect());
        assert!(!base.is_set(MAX_CONCURRENT_STREAMS));
        assert_eq!(base.header_table_size(), 0);
    }

    #[rstest]
    #[case::beyond(COUNT as u16)]
    #[case::far(0xffff)]
    fn out_of_range_ids_are_ignored(#[case] id: u16) {
        let mut settings = Settings::new();
        settings.set(id, 1);
        assert!(settings.is_empty());
        assert_eq!(settings.get(id), None);
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = Settings::new();
        assert_eq!(settings.initial_window_size(), DEFAULT_INITIAL_WINDOW_SIZE);
        assert_eq!(settings.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
        assert!(settings.enable_push(true));
        assert_eq!(settings.max_concurrent_streams(u32::MAX), u32::MAX);
    }
}
