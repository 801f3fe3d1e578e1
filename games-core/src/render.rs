use serde::Deserialize;

use crate::{seed_games, GameRecord};

pub const EMPTY_PLACEHOLDER: &str = "No recently played games";

/// A list feed as served by `GET /games`, or the older bare-array shape.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FeedPayload {
    Wrapped { games: Vec<GameRecord> },
    Bare(Vec<GameRecord>),
}

impl FeedPayload {
    pub fn into_games(self) -> Vec<GameRecord> {
        match self {
            FeedPayload::Wrapped { games } | FeedPayload::Bare(games) => games,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    Live,
    Cached,
    Seed,
}

/// Pick what to draw: the live feed, else a non-empty cached copy, else the seed list.
pub fn resolve_feed(
    live: Option<FeedPayload>,
    cached: Option<Vec<GameRecord>>,
) -> (Vec<GameRecord>, FeedSource) {
    if let Some(feed) = live {
        return (feed.into_games(), FeedSource::Live);
    }
    match cached {
        Some(games) if !games.is_empty() => (games, FeedSource::Cached),
        _ => (seed_games(), FeedSource::Seed),
    }
}

/// Render the whole list container, in list order.
pub fn render_list(games: &[GameRecord]) -> String {
    let mut html = String::from("<div class=\"recent-play\">\n<h3>Recently Played</h3>\n");
    if games.is_empty() {
        html.push_str(&format!("<div class=\"input-group empty\">{EMPTY_PLACEHOLDER}</div>\n"));
    }
    for game in games {
        html.push_str(&format!(
            "<div class=\"input-group\" data-id=\"{}\"><div class=\"icon-container\"><img src=\"{}\" alt=\"\"></div><div class=\"game-name\">{}</div></div>\n",
            game.id,
            escape(&game.icon),
            escape(&game.name),
        ));
    }
    html.push_str("</div>\n");
    html
}

pub fn render_page(games: &[GameRecord]) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Recently Played</title></head>\n<body>\n{}</body>\n</html>\n",
        render_list(games)
    )
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
