// Chapter Domain Model
// A title/category period within one recording

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub started_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub game_id: Option<String>,
    #[serde(default)]
    pub game_name: Option<String>,
    #[serde(default)]
    pub is_favourite: bool,

    /// Seconds from recording start
    #[serde(default)]
    pub offset: Option<f64>,
    /// Seconds
    #[serde(default)]
    pub duration: Option<f64>,
}

impl Chapter {
    pub fn new(started_at: DateTime<Utc>, title: impl Into<String>) -> Self {
        Self {
            started_at,
            title: title.into(),
            game_id: None,
            game_name: None,
            is_favourite: false,
            offset: None,
            duration: None,
        }
    }

    /// "title (game)" label used by sidecar files
    pub fn label(&self) -> String {
        match self.game_name.as_deref().or(self.game_id.as_deref()) {
            Some(game) => format!("{} ({})", self.title, game),
            None => self.title.clone(),
        }
    }

    /// Compute offset/duration relative to the recording.
    ///
    /// A chapter that began before the recording is clamped to the recording
    /// start (offset 0). Duration runs to the next chapter, else to the
    /// recording end; with neither, duration is left untouched.
    pub fn calculate_duration_and_offset(
        &mut self,
        recording_started_at: DateTime<Utc>,
        recording_ended_at: Option<DateTime<Utc>>,
        next_chapter_started_at: Option<DateTime<Utc>>,
    ) {
        let effective_start = if recording_started_at > self.started_at {
            self.offset = Some(0.0);
            recording_started_at
        } else {
            self.offset = Some(seconds_between(recording_started_at, self.started_at));
            self.started_at
        };

        match next_chapter_started_at.or(recording_ended_at) {
            Some(end) => self.duration = Some(seconds_between(effective_start, end)),
            None => warn!(
                chapter = %self.title,
                started_at = %self.started_at,
                "No next chapter or recording end, duration will probably be 0"
            ),
        }
    }
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Recalculate every chapter against its successor.
/// Returns false when there is nothing to calculate.
pub fn calculate_chapters(
    chapters: &mut [Chapter],
    recording_started_at: Option<DateTime<Utc>>,
    recording_ended_at: Option<DateTime<Utc>>,
) -> bool {
    let Some(started_at) = recording_started_at else {
        return false;
    };
    if chapters.is_empty() {
        return false;
    }

    let next_starts: Vec<Option<DateTime<Utc>>> = chapters
        .iter()
        .skip(1)
        .map(|c| Some(c.started_at))
        .chain(std::iter::once(None))
        .collect();

    for (chapter, next) in chapters.iter_mut().zip(next_starts) {
        chapter.calculate_duration_and_offset(started_at, recording_ended_at, next);
    }
    true
}

/// Drop chapters whose duration is not greater than `min_duration_secs`.
/// A minimum of 0 disables filtering; chapters without a duration are kept.
pub fn remove_short_chapters(chapters: Vec<Chapter>, min_duration_secs: u64) -> Vec<Chapter> {
    if min_duration_secs == 0 {
        return chapters;
    }
    let min = min_duration_secs as f64;

    chapters
        .into_iter()
        .filter(|chapter| match chapter.duration {
            Some(duration) if duration > min => true,
            Some(duration) => {
                info!(chapter = %chapter.title, duration, "Removing short chapter");
                false
            }
            None => {
                warn!(chapter = %chapter.title, "Chapter has no duration, keeping it");
                true
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_chapter_before_recording_is_clamped() {
        let mut chapters = vec![Chapter::new(at(-600), "pre-stream"), Chapter::new(at(300), "main")];

        assert!(calculate_chapters(&mut chapters, Some(at(0)), Some(at(900))));

        assert_eq!(chapters[0].offset, Some(0.0));
        assert_eq!(chapters[0].duration, Some(300.0), "measured from recording start");
        assert_eq!(chapters[1].offset, Some(300.0));
        assert_eq!(chapters[1].duration, Some(600.0), "last chapter runs to recording end");
    }

    #[test]
    fn test_open_recording_leaves_last_duration_unset() {
        let mut chapters = vec![Chapter::new(at(0), "only")];
        calculate_chapters(&mut chapters, Some(at(0)), None);

        assert_eq!(chapters[0].offset, Some(0.0));
        assert_eq!(chapters[0].duration, None);
    }

    #[test]
    fn test_no_start_time() {
        let mut chapters = vec![Chapter::new(at(0), "only")];
        assert!(!calculate_chapters(&mut chapters, None, Some(at(10))));
    }

    #[test]
    fn test_remove_short_chapters() {
        let mut long = Chapter::new(at(0), "long");
        long.duration = Some(Duration::minutes(10).num_seconds() as f64);
        let mut short = Chapter::new(at(600), "short");
        short.duration = Some(60.0);
        let mut exact = Chapter::new(at(660), "exact");
        exact.duration = Some(120.0);
        let unknown = Chapter::new(at(780), "unknown");

        let kept = remove_short_chapters(vec![long, short, exact, unknown], 120);
        let titles: Vec<&str> = kept.iter().map(|c| c.title.as_str()).collect();

        assert_eq!(titles, vec!["long", "unknown"]);
    }

    #[test]
    fn test_remove_short_chapters_disabled() {
        let mut short = Chapter::new(at(0), "short");
        short.duration = Some(1.0);
        assert_eq!(remove_short_chapters(vec![short], 0).len(), 1);
    }

    #[test]
    fn test_label() {
        let mut chapter = Chapter::new(at(0), "Any% attempts");
        assert_eq!(chapter.label(), "Any% attempts");
        chapter.game_name = Some("Celeste".to_string());
        assert_eq!(chapter.label(), "Any% attempts (Celeste)");
    }
}
