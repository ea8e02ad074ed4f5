// Live Event - what the trigger source tells the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Chapter;

/// "Channel went live" / "channel updated" payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEvent {
    /// Upstream session id, used to deduplicate triggers
    pub capture_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default)]
    pub game_name: Option<String>,
    #[serde(default)]
    pub is_favourite_game: bool,
}

impl LiveEvent {
    /// Chapter describing the state carried by this event, starting at `at`
    pub fn to_chapter(&self, at: DateTime<Utc>) -> Chapter {
        let mut chapter = Chapter::new(at, self.title.clone());
        chapter.game_id = self.game_id.clone();
        chapter.game_name = self.game_name.clone();
        chapter.is_favourite = self.is_favourite_game;
        chapter
    }
}
