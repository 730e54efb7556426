use m3u8_rs::{MasterPlaylist, Resolution, VariantStream};
use std::collections::HashSet;

/// Variants worth downloading, the first one listed wins for each height.
///
/// I-frame playlists and variants missing a resolution or codecs are ignored.
pub fn distinct_variants(master: &MasterPlaylist) -> Vec<&VariantStream> {
    let mut seen = HashSet::new();

    master
        .variants
        .iter()
        .filter(|x| !x.is_i_frame && x.codecs.is_some())
        .filter(|x| match &x.resolution {
            Some(Resolution { height, .. }) => seen.insert(*height),
            None => false,
        })
        .collect()
}
