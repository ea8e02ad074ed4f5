// Recording naming templates
// `{variable}` placeholders rendered from the session, then sanitized

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::{Channel, LiveEvent, StreamNumbers};

/// Characters never allowed in a file or folder name
const RESERVED: [char; 9] = ['/', '\\', '?', '<', '>', ':', '*', '|', '"'];

/// Values available to naming templates
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<&'static str, String>,
}

impl TemplateVars {
    pub fn for_session(
        channel: &Channel,
        event: &LiveEvent,
        numbers: Option<&StreamNumbers>,
    ) -> Self {
        let started_at = event.started_at;
        let mut values = HashMap::new();

        values.insert("login", channel.login.clone());
        values.insert("internalName", channel.login.clone());
        values.insert("displayName", channel.display().to_string());
        values.insert("date", iso_date(started_at).replace(':', "_"));
        values.insert("year", started_at.format("%Y").to_string());
        values.insert("year_short", started_at.format("%y").to_string());
        values.insert("month", started_at.format("%m").to_string());
        values.insert("day", started_at.format("%d").to_string());
        values.insert("hour", started_at.format("%H").to_string());
        values.insert("minute", started_at.format("%M").to_string());
        values.insert("second", started_at.format("%S").to_string());
        values.insert("id", event.capture_id.clone());
        values.insert("title", event.title.clone());
        values.insert("game_name", event.game_name.clone().unwrap_or_default());
        values.insert("game_id", event.game_id.clone().unwrap_or_default());

        if let Some(n) = numbers {
            values.insert("season", non_zero(n.season, false));
            values.insert("absolute_season", non_zero(n.absolute_season, true));
            values.insert("episode", non_zero(n.episode, true));
            values.insert("absolute_episode", non_zero(n.absolute_episode, true));
        }

        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

fn iso_date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn non_zero(n: u32, pad: bool) -> String {
    match (n, pad) {
        (0, _) => String::new(),
        (n, true) => format!("{:02}", n),
        (n, false) => n.to_string(),
    }
}

/// Replace `{name}` placeholders. Unknown or empty variables stay as written.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.get(key).filter(|v| !v.is_empty()) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Strip path separators, reserved and control characters, and trailing dots/spaces
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !RESERVED.contains(c) && !c.is_control())
        .collect();
    cleaned.trim_end_matches(['.', ' ']).to_string()
}

/// Sanitized recording basename
pub fn basename(template: &str, vars: &TemplateVars) -> String {
    sanitize(&render(template, vars))
}

/// `<storage>/<login>[/<rendered vod_folder>]`
pub fn folder(storage_dir: &Path, login: &str, vod_folder: &str, vars: &TemplateVars) -> PathBuf {
    let base = storage_dir.join(login);
    if vod_folder.is_empty() {
        return base;
    }
    let sub = sanitize(&render(vod_folder, vars));
    if sub.is_empty() {
        base
    } else {
        base.join(sub)
    }
}
