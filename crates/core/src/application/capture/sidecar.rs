// Sidecar file renderers
// Pure text generation; writing happens in the pipeline

use crate::domain::{Channel, Chapter, Recording};

/// `;FFMETADATA1` chapter file, times in milliseconds
pub fn ffmetadata(title: Option<&str>, artist: Option<&str>, chapters: &[Chapter]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    if let Some(title) = title {
        out.push_str(&format!("title={}\n", escape_ffmetadata(title)));
    }
    if let Some(artist) = artist {
        out.push_str(&format!("artist={}\n", escape_ffmetadata(artist)));
    }
    out.push('\n');

    for chapter in chapters {
        let offset = chapter.offset.unwrap_or(0.0);
        let duration = chapter.duration.unwrap_or(0.0);
        let start = (offset * 1000.0).floor() as i64;
        let end = ((offset + duration) * 1000.0).floor() as i64;

        out.push_str("[CHAPTER]\n");
        out.push_str("TIMEBASE=1/1000\n");
        out.push_str(&format!("START={}\n", start));
        out.push_str(&format!("END={}\n", end));
        out.push_str(&format!("title={}\n\n", escape_ffmetadata(&chapter.label())));
    }
    out
}

fn escape_ffmetadata(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '=' | ';' | '#' | '\n') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// WebVTT chapter track
pub fn vtt(chapters: &[Chapter]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for (i, chapter) in chapters.iter().enumerate() {
        let start = chapter.offset.unwrap_or(0.0);
        let end = start + chapter.duration.unwrap_or(0.0);
        out.push_str(&format!("Chapter {}\n", i + 1));
        out.push_str(&format!("{} --> {}\n", vtt_time(start), vtt_time(end)));
        out.push_str(&format!("{}\n\n", chapter.label()));
    }
    out
}

fn vtt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).floor() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}

/// LosslessCut EDL: `start,end,"label"` with offsets relative to the first chapter.
/// The last row has an open end. Chapters without an offset are skipped.
pub fn losslesscut_csv(chapters: &[Chapter]) -> String {
    let first = chapters.first().and_then(|c| c.offset).unwrap_or(0.0);
    let last = chapters.len().saturating_sub(1);
    let mut out = String::new();

    for (i, chapter) in chapters.iter().enumerate() {
        let Some(offset) = chapter.offset else {
            continue;
        };
        let offset = offset - first;
        let game = chapter
            .game_name
            .as_deref()
            .or(chapter.game_id.as_deref())
            .unwrap_or_default();
        let label = format!("{} ({})", game, chapter.title).replace('"', "\\\"");

        if i < last {
            let end = offset + chapter.duration.unwrap_or(0.0);
            out.push_str(&format!("{},{},\"{}\"\n", offset, end, label));
        } else {
            out.push_str(&format!("{},,\"{}\"\n", offset, label));
        }
    }
    out
}

/// Kodi episode NFO
pub fn kodi_nfo(recording: &Recording, channel: &Channel) -> String {
    let title = recording
        .chapters
        .first()
        .map(|c| c.title.as_str())
        .unwrap_or(&recording.basename);
    let started = recording.started_at.unwrap_or(recording.created_at);
    let episode = recording
        .stream_numbers
        .map(|n| n.episode)
        .unwrap_or_default();

    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\" ?>\n");
    out.push_str("<episodedetails>\n");
    out.push_str(&format!("\t<title>{}</title>\n", xml_escape(title)));
    out.push_str(&format!("\t<showtitle>{}</showtitle>\n", xml_escape(channel.display())));
    if let Some(id) = &recording.upstream_id {
        out.push_str(&format!(
            "\t<uniqueid type=\"{}\">{}</uniqueid>\n",
            channel.provider,
            xml_escape(id)
        ));
    }
    out.push_str(&format!("\t<season>{}</season>\n", started.format("%Y%m")));
    out.push_str(&format!("\t<episode>{}</episode>\n", episode));

    if !recording.chapters.is_empty() {
        let plot: String = recording
            .chapters
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}\n", i + 1, c.label()))
            .collect();
        out.push_str(&format!("\t<plot>{}</plot>\n", xml_escape(&plot)));
    }

    if let Some(info) = &recording.media_info {
        out.push_str(&format!(
            "\t<runtime>{}</runtime>\n",
            (info.duration_secs / 60.0).ceil() as u64
        ));
    }

    out.push_str("\t<actor>\n");
    out.push_str(&format!("\t\t<name>{}</name>\n", xml_escape(channel.display())));
    out.push_str("\t\t<role>Themselves</role>\n");
    out.push_str("\t</actor>\n");

    let mut games: Vec<&str> = Vec::new();
    for chapter in &recording.chapters {
        if let Some(game) = chapter.game_name.as_deref() {
            if !games.contains(&game) {
                games.push(game);
            }
        }
    }
    for game in games {
        out.push_str(&format!("\t<tag>{}</tag>\n", xml_escape(game)));
    }

    let day = started.format("%Y-%m-%d");
    out.push_str(&format!("\t<premiered>{}</premiered>\n", day));
    out.push_str(&format!("\t<aired>{}</aired>\n", day));
    out.push_str(&format!("\t<dateadded>{}</dateadded>\n", day));
    out.push_str("</episodedetails>\n");
    out
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderKind;
    use crate::port::recording_store::mocks::finalized_recording;
    use chrono::{TimeZone, Utc};

    fn chapters() -> Vec<Chapter> {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        let mut a = Chapter::new(at, "Intro; hello=world");
        a.game_name = Some("Just Chatting".to_string());
        a.offset = Some(0.0);
        a.duration = Some(600.5);

        let mut b = Chapter::new(at, "Run \"1\"");
        b.game_name = Some("Celeste".to_string());
        b.offset = Some(600.5);
        b.duration = Some(3661.25);
        vec![a, b]
    }

    #[test]
    fn test_ffmetadata() {
        let text = ffmetadata(Some("Stream #1"), Some("SomeStreamer"), &chapters());

        assert!(text.starts_with(";FFMETADATA1\ntitle=Stream \\#1\nartist=SomeStreamer\n\n"));
        assert!(text.contains(
            "[CHAPTER]\nTIMEBASE=1/1000\nSTART=0\nEND=600500\ntitle=Intro\\; hello\\=world (Just Chatting)\n\n"
        ));
        assert!(text.contains("START=600500\nEND=4261750\n"));
    }

    #[test]
    fn test_vtt() {
        let text = vtt(&chapters());
        assert!(text.starts_with("WEBVTT\n\nChapter 1\n00:00:00.000 --> 00:10:00.500\n"));
        assert!(text.contains("Chapter 2\n00:10:00.500 --> 01:11:01.750\nRun \"1\" (Celeste)\n"));
    }

    #[test]
    fn test_losslesscut_csv() {
        let text = losslesscut_csv(&chapters());
        assert_eq!(
            text,
            "0,600.5,\"Just Chatting (Intro; hello=world)\"\n600.5,,\"Celeste (Run \\\"1\\\")\"\n"
        );
    }

    #[test]
    fn test_kodi_nfo() {
        let started_at = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        let mut recording = finalized_recording("u1", "somestreamer", started_at, 1);
        recording.chapters = chapters();
        let channel = Channel::new("somestreamer", ProviderKind::Twitch);

        let nfo = kodi_nfo(&recording, &channel);
        assert!(nfo.contains("<title>Intro; hello=world</title>"));
        assert!(nfo.contains("<season>202405</season>"));
        assert!(nfo.contains("<tag>Celeste</tag>"));
        assert!(nfo.contains("<aired>2024-05-01</aired>"));
        assert!(nfo.ends_with("</episodedetails>\n"));
    }
}
