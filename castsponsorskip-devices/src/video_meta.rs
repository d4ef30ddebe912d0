/// The identity of the currently playing and previously observed video of a device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoMeta {
    pub curr_video_id: String,
    pub curr_artist: String,
    pub curr_title: String,

    pub prev_video_id: String,
    pub prev_artist: String,
    pub prev_title: String,
}

impl VideoMeta {
    /// Reset both the current and previous video identity.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Returns true when the current artist or title is blank.
    pub fn empty(&self) -> bool {
        self.curr_artist.is_empty() || self.curr_title.is_empty()
    }

    /// Returns true when the current artist and title both match the previous ones.
    pub fn same_video(&self) -> bool {
        self.curr_artist == self.prev_artist && self.curr_title == self.prev_title
    }
}
