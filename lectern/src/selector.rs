use crate::rendition::Rendition;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no renditions to choose from")]
    Empty,
}

/// Stable sort, highest first.
pub fn sort_by_height(renditions: &mut [Rendition]) {
    renditions.sort_by(|a, b| b.height.cmp(&a.height));
}

/// Pick the rendition to download.
///
/// Without a target the tallest rendition wins. With a target the rendition whose
/// height is nearest wins. Ties go to the rendition listed first.
pub fn select(renditions: &[Rendition], target: Option<u32>) -> Result<&Rendition, SelectError> {
    let chosen = match target {
        Some(target) => renditions
            .iter()
            .min_by_key(|x| x.height.abs_diff(target)),
        None => renditions
            .iter()
            .reduce(|best, x| if x.height > best.height { x } else { best }),
    };

    chosen.ok_or(SelectError::Empty)
}
