//! Catalog ordering.
//!
//! Each [`SortKey`] maps to a plain comparator function, picked once per sort.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::image::Image;

/// Field the catalog is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Name,
    ModifiedTime,
    FileSize,
    FileType,
    Area,
    Width,
    Height,
}

impl SortKey {
    pub const ALL: [SortKey; 7] = [
        SortKey::Name,
        SortKey::ModifiedTime,
        SortKey::FileSize,
        SortKey::FileType,
        SortKey::Area,
        SortKey::Width,
        SortKey::Height,
    ];

    /// Keys whose values are only known once a thumbnail or decode completes.
    pub fn depends_on_dimensions(self) -> bool {
        matches!(self, SortKey::Area | SortKey::Width | SortKey::Height)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::ModifiedTime => "modified_time",
            SortKey::FileSize => "file_size",
            SortKey::FileType => "file_type",
            SortKey::Area => "area",
            SortKey::Width => "width",
            SortKey::Height => "height",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SortKey::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown sort key: {}", s))
    }
}

/// Sort key plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub ascending: bool,
}

impl SortSpec {
    pub fn new(key: SortKey, ascending: bool) -> Self {
        Self { key, ascending }
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortKey::Name, true)
    }
}

pub type Comparator = fn(&Image, &Image) -> Ordering;

fn by_name(a: &Image, b: &Image) -> Ordering {
    a.sort_name().cmp(b.sort_name())
}

fn by_modified_time(a: &Image, b: &Image) -> Ordering {
    a.identity().modified.cmp(&b.identity().modified)
}

fn by_file_size(a: &Image, b: &Image) -> Ordering {
    a.identity().size.cmp(&b.identity().size)
}

fn by_file_type(a: &Image, b: &Image) -> Ordering {
    a.file_type().cmp(&b.file_type())
}

fn by_area(a: &Image, b: &Image) -> Ordering {
    a.area().cmp(&b.area())
}

fn by_width(a: &Image, b: &Image) -> Ordering {
    a.width().cmp(&b.width())
}

fn by_height(a: &Image, b: &Image) -> Ordering {
    a.height().cmp(&b.height())
}

/// Comparator for `key`, ascending.
pub fn comparator(key: SortKey) -> Comparator {
    match key {
        SortKey::Name => by_name,
        SortKey::ModifiedTime => by_modified_time,
        SortKey::FileSize => by_file_size,
        SortKey::FileType => by_file_type,
        SortKey::Area => by_area,
        SortKey::Width => by_width,
        SortKey::Height => by_height,
    }
}

/// Sort `images` in place. Ties fall back to name order.
pub fn sort_images(images: &mut [Image], spec: SortSpec) {
    let compare = comparator(spec.key);
    images.sort_by(|a, b| {
        let ordering = compare(a, b).then_with(|| by_name(a, b));
        if spec.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageId;
    use thumbview_cache::SourceIdentity;
    use std::time::{Duration, UNIX_EPOCH};

    fn image(id: u64, name: &str, size: u64, secs: u64) -> Image {
        Image::new(
            ImageId(id),
            SourceIdentity::new(format!("/p/{}", name), size, UNIX_EPOCH + Duration::from_secs(secs)),
        )
    }

    fn names(images: &[Image]) -> Vec<String> {
        images.iter().map(|i| i.file_name()).collect()
    }

    #[test]
    fn test_name_sort_is_case_insensitive() {
        let mut images = vec![image(1, "b.png", 1, 1), image(2, "A.png", 1, 1), image(3, "c.png", 1, 1)];
        sort_images(&mut images, SortSpec::new(SortKey::Name, true));
        assert_eq!(names(&images), ["A.png", "b.png", "c.png"]);

        sort_images(&mut images, SortSpec::new(SortKey::Name, false));
        assert_eq!(names(&images), ["c.png", "b.png", "A.png"]);
    }

    #[test]
    fn test_size_and_time_sorts() {
        let mut images = vec![image(1, "a.png", 30, 2), image(2, "b.png", 10, 3), image(3, "c.png", 20, 1)];

        sort_images(&mut images, SortSpec::new(SortKey::FileSize, true));
        assert_eq!(names(&images), ["b.png", "c.png", "a.png"]);

        sort_images(&mut images, SortSpec::new(SortKey::ModifiedTime, true));
        assert_eq!(names(&images), ["c.png", "a.png", "b.png"]);
    }

    #[test]
    fn test_type_sort_groups_by_extension() {
        let mut images = vec![image(1, "a.jpg", 1, 1), image(2, "b.png", 1, 1), image(3, "c.gif", 1, 1)];
        sort_images(&mut images, SortSpec::new(SortKey::FileType, true));
        assert_eq!(names(&images), ["b.png", "a.jpg", "c.gif"]);
    }

    #[test]
    fn test_unknown_dimensions_sort_as_zero() {
        let mut images = vec![image(1, "a.png", 1, 1), image(2, "b.png", 1, 1)];
        sort_images(&mut images, SortSpec::new(SortKey::Area, true));
        // Both unknown: tie broken by name
        assert_eq!(names(&images), ["a.png", "b.png"]);
        assert_eq!(comparator(SortKey::Width)(&images[0], &images[1]), Ordering::Equal);
    }

    #[test]
    fn test_dimension_keys() {
        let dependent: Vec<_> = SortKey::ALL.into_iter().filter(|k| k.depends_on_dimensions()).collect();
        assert_eq!(dependent, [SortKey::Area, SortKey::Width, SortKey::Height]);
    }

    #[test]
    fn test_parse_sort_keys() {
        for key in SortKey::ALL {
            assert_eq!(key.as_str().parse::<SortKey>().unwrap(), key);
        }
        assert_eq!("AREA".parse::<SortKey>().unwrap(), SortKey::Area);
        assert!("colour".parse::<SortKey>().is_err());
    }
}
