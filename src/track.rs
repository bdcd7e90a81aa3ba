/// One queueable item. Immutable once added; identity is positional (two
/// tracks with the same title are distinct queue entries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    /// Watch-page URL (or other resolvable reference), not the direct
    /// stream URL — that is re-resolved at play time because stream URLs
    /// expire.
    pub url: String,
    pub title: String,
    pub duration_secs: u64,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            duration_secs,
        }
    }

    /// `m:ss` rendering for queue listings.
    pub fn duration_display(&self) -> String {
        let mins = self.duration_secs / 60;
        let secs = self.duration_secs % 60;
        format!("{mins}:{secs:02}")
    }
}
