use serde::{Deserialize, Serialize};

/// An entry as returned by a catalog source, before it is mapped to a local
/// [`crate::Entry`].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SourceEntry {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub initialized: bool,
}

impl SourceEntry {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SourceChapter {
    pub url: String,
    pub name: String,
    #[serde(default = "unknown_chapter_number")]
    pub chapter_number: f64,
    #[serde(default)]
    pub date_upload: i64,
    #[serde(default)]
    pub scanlator: Option<String>,
}

fn unknown_chapter_number() -> f64 {
    -1.0
}

impl SourceChapter {
    pub fn new(url: impl Into<String>, name: impl Into<String>, chapter_number: f64) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            chapter_number,
            ..Default::default()
        }
    }
}
